//! Transform chains, their persistent state, and the offload decision.
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Range;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, TransformError};
use crate::shape;
use crate::spectral;
use crate::temporal::{decay_per_update, AverageState, GravityState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransformKind {
    Window,
    Fft,
    Gravity,
    Average,
    Wrange,
    Smooth,
}

impl TransformKind {
    pub const ALL: [TransformKind; 6] = [
        TransformKind::Window,
        TransformKind::Fft,
        TransformKind::Gravity,
        TransformKind::Average,
        TransformKind::Wrange,
        TransformKind::Smooth,
    ];

    /// Name used by the `transform` request.
    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Window => "window",
            TransformKind::Fft => "fft",
            TransformKind::Gravity => "gravity",
            TransformKind::Average => "avg",
            TransformKind::Wrange => "wrange",
            TransformKind::Smooth => "smooth",
        }
    }

    pub fn is_stateful(self) -> bool {
        matches!(self, TransformKind::Gravity | TransformKind::Average)
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransformKind {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self> {
        TransformKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| TransformError::UnknownTransform(s.to_string()))
    }
}

/// Run-wide numeric parameters shared by every chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParams {
    /// Fixed audio buffer length N.
    pub buffer_len: usize,
    /// Audio updates per second (`sample_rate / sample_size`).
    pub update_rate: f32,
    pub gravity_step: f32,
    pub avg_frames: usize,
    pub avg_window: bool,
    pub fft_scale: f32,
    pub fft_cutoff: f32,
    pub smooth_distance: f32,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            buffer_len: 2048,
            update_rate: 22_050.0 / 1024.0,
            gravity_step: 4.2,
            avg_frames: 6,
            avg_window: true,
            fft_scale: 10.2,
            fft_cutoff: 0.3,
            smooth_distance: 0.01,
        }
    }
}

impl TransformParams {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_len < 2 || !self.buffer_len.is_power_of_two() {
            return Err(TransformError::NotPowerOfTwo(self.buffer_len));
        }
        if !(self.update_rate.is_finite() && self.update_rate > 0.0) {
            return Err(TransformError::Parameter(format!(
                "update rate must be positive, got {}",
                self.update_rate
            )));
        }
        if self.avg_frames == 0 {
            return Err(TransformError::Parameter(
                "average frame count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn gravity_decay(&self) -> f32 {
        decay_per_update(self.gravity_step, self.update_rate)
    }
}

/// Identity of one uniform binding across the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub binding: BindingId,
    /// Position of the transform inside its chain.
    pub step: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformState {
    Gravity(GravityState),
    Average(AverageState),
}

impl TransformState {
    pub fn kind(&self) -> TransformKind {
        match self {
            TransformState::Gravity(_) => TransformKind::Gravity,
            TransformState::Average(_) => TransformKind::Average,
        }
    }
}

fn mismatch(key: StateKey, found: &TransformState) -> TransformError {
    TransformError::StateMismatch {
        binding: key.binding.0,
        step: key.step,
        found: found.kind(),
    }
}

/// Persistent state for every stateful step, allocated on first use.
#[derive(Debug, Default)]
pub struct StateStore {
    states: HashMap<StateKey, TransformState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, key: &StateKey) -> Option<&TransformState> {
        self.states.get(key)
    }

    pub fn gravity(&mut self, key: StateKey, len: usize) -> Result<&mut GravityState> {
        match self
            .states
            .entry(key)
            .or_insert_with(|| TransformState::Gravity(GravityState::new(len)))
        {
            TransformState::Gravity(state) => Ok(state),
            other => Err(mismatch(key, other)),
        }
    }

    pub fn average(
        &mut self,
        key: StateKey,
        frames: usize,
        len: usize,
    ) -> Result<&mut AverageState> {
        match self
            .states
            .entry(key)
            .or_insert_with(|| TransformState::Average(AverageState::new(frames, len)))
        {
            TransformState::Average(state) => Ok(state),
            other => Err(mismatch(key, other)),
        }
    }

    /// Drops all state owned by one binding.
    pub fn release(&mut self, binding: BindingId) {
        self.states.retain(|key, _| key.binding != binding);
    }
}

/// Chain tails a GPU backend may execute in place of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffloadTail {
    Fft,
    FftGravity,
    FftGravityAverage,
}

impl OffloadTail {
    pub fn steps(self) -> &'static [TransformKind] {
        match self {
            OffloadTail::Fft => &[TransformKind::Fft],
            OffloadTail::FftGravity => &[TransformKind::Fft, TransformKind::Gravity],
            OffloadTail::FftGravityAverage => &[
                TransformKind::Fft,
                TransformKind::Gravity,
                TransformKind::Average,
            ],
        }
    }

    pub fn has_gravity(self) -> bool {
        !matches!(self, OffloadTail::Fft)
    }

    pub fn has_average(self) -> bool {
        matches!(self, OffloadTail::FftGravityAverage)
    }
}

/// Where a binding's chain executes. Decided once and never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    Cpu,
    /// Steps before `prefix` stay on the CPU; the tail runs as GPU passes.
    GpuOffloaded { prefix: usize, tail: OffloadTail },
}

impl ChainMode {
    pub fn decide(chain: &Chain, accel_enabled: bool, backend_supports: bool) -> Self {
        match chain.offload_split() {
            Some((prefix, tail)) if accel_enabled && backend_supports => {
                debug!(prefix, ?tail, "offloading chain tail");
                ChainMode::GpuOffloaded { prefix, tail }
            }
            _ => ChainMode::Cpu,
        }
    }

    pub fn is_offloaded(self) -> bool {
        matches!(self, ChainMode::GpuOffloaded { .. })
    }

    /// Range of steps the CPU runs under this mode.
    pub fn cpu_steps(self, chain: &Chain) -> Range<usize> {
        match self {
            ChainMode::Cpu => 0..chain.len(),
            ChainMode::GpuOffloaded { prefix, .. } => 0..prefix,
        }
    }
}

/// Ordered transforms attached to one uniform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Chain {
    steps: Vec<TransformKind>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: TransformKind) {
        self.steps.push(kind);
    }

    pub fn steps(&self) -> &[TransformKind] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the offloadable tail and its shape, longest match first.
    pub fn offload_split(&self) -> Option<(usize, OffloadTail)> {
        [
            OffloadTail::FftGravityAverage,
            OffloadTail::FftGravity,
            OffloadTail::Fft,
        ]
        .into_iter()
        .find(|tail| self.steps.ends_with(tail.steps()))
        .map(|tail| (self.steps.len() - tail.steps().len(), tail))
    }

    /// Runs every step in declaration order.
    pub fn run(
        &self,
        binding: BindingId,
        buffer: &mut [f32],
        params: &TransformParams,
        store: &mut StateStore,
    ) -> Result<()> {
        self.run_steps(0..self.steps.len(), binding, buffer, params, store)
    }

    /// Runs a contiguous subrange, keeping state keyed by each step's position
    /// in the full chain.
    pub fn run_steps(
        &self,
        range: Range<usize>,
        binding: BindingId,
        buffer: &mut [f32],
        params: &TransformParams,
        store: &mut StateStore,
    ) -> Result<()> {
        for step in range {
            let Some(kind) = self.steps.get(step).copied() else {
                break;
            };
            let key = StateKey { binding, step };
            match kind {
                TransformKind::Window => spectral::window(buffer),
                TransformKind::Fft => spectral::fft(buffer, params.fft_scale, params.fft_cutoff)?,
                TransformKind::Gravity => store
                    .gravity(key, buffer.len())?
                    .apply(buffer, params.gravity_decay())?,
                TransformKind::Average => store
                    .average(key, params.avg_frames, buffer.len())?
                    .apply(buffer, params.avg_window)?,
                TransformKind::Wrange => shape::wrange(buffer),
                TransformKind::Smooth => shape::smooth(buffer, params.smooth_distance),
            }
        }
        Ok(())
    }
}

impl FromIterator<TransformKind> for Chain {
    fn from_iter<I: IntoIterator<Item = TransformKind>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.steps.iter().map(|kind| kind.name()).collect();
        write!(f, "[{}]", names.join(" "))
    }
}

/// Per-tick cache so a (source, chain) pair is evaluated at most once.
#[derive(Debug)]
pub struct ChainMemo<K> {
    results: HashMap<(K, Chain), Vec<f32>>,
}

impl<K: Hash + Eq> Default for ChainMemo<K> {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> ChainMemo<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the cached output, computing it with `run` on a miss.
    pub fn get_or_try_insert<F>(&mut self, source: &K, chain: &Chain, run: F) -> Result<&[f32]>
    where
        F: FnOnce() -> Result<Vec<f32>>,
    {
        match self.results.entry((source.clone(), chain.clone())) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_slice()),
            Entry::Vacant(entry) => Ok(entry.insert(run()?).as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(names: &[&str]) -> Chain {
        names.iter().map(|name| name.parse().unwrap()).collect()
    }

    #[test]
    fn parses_transform_names() {
        assert_eq!("avg".parse::<TransformKind>(), Ok(TransformKind::Average));
        assert_eq!(
            "blur".parse::<TransformKind>(),
            Err(TransformError::UnknownTransform("blur".into()))
        );
        for kind in TransformKind::ALL {
            assert_eq!(kind.name().parse::<TransformKind>(), Ok(kind));
        }
    }

    #[test]
    fn detects_offloadable_tails() {
        assert_eq!(chain(&["fft"]).offload_split(), Some((0, OffloadTail::Fft)));
        assert_eq!(
            chain(&["window", "fft", "gravity", "avg"]).offload_split(),
            Some((1, OffloadTail::FftGravityAverage))
        );
        assert_eq!(
            chain(&["window", "fft", "gravity"]).offload_split(),
            Some((1, OffloadTail::FftGravity))
        );
        assert_eq!(chain(&["fft", "smooth"]).offload_split(), None);
        assert_eq!(chain(&["fft", "avg"]).offload_split(), None);
    }

    #[test]
    fn mode_requires_acceleration_and_backend() {
        let fft = chain(&["window", "fft"]);
        assert_eq!(ChainMode::decide(&fft, false, true), ChainMode::Cpu);
        assert_eq!(ChainMode::decide(&fft, true, false), ChainMode::Cpu);
        let mode = ChainMode::decide(&fft, true, true);
        assert_eq!(
            mode,
            ChainMode::GpuOffloaded {
                prefix: 1,
                tail: OffloadTail::Fft
            }
        );
        assert_eq!(mode.cpu_steps(&fft), 0..1);
    }

    #[test]
    fn state_is_allocated_per_step() {
        let params = TransformParams {
            buffer_len: 8,
            avg_frames: 2,
            ..TransformParams::default()
        };
        let mut store = StateStore::new();
        let chain = chain(&["gravity", "avg", "wrange"]);
        let mut buffer = vec![1.0; 8];
        chain.run(BindingId(3), &mut buffer, &params, &mut store).unwrap();
        assert_eq!(store.len(), 2);
        assert!(matches!(
            store.get(&StateKey {
                binding: BindingId(3),
                step: 1
            }),
            Some(TransformState::Average(_))
        ));
        store.release(BindingId(3));
        assert!(store.is_empty());
    }

    #[test]
    fn memo_runs_each_pair_once() {
        let mut memo = ChainMemo::new();
        let fft = chain(&["fft"]);
        let mut calls = 0;
        for _ in 0..3 {
            let output = memo
                .get_or_try_insert(&"audio_l", &fft, || {
                    calls += 1;
                    Ok(vec![1.0, 2.0])
                })
                .unwrap();
            assert_eq!(output, &[1.0, 2.0]);
        }
        memo.get_or_try_insert(&"audio_r", &fft, || Ok(vec![0.0, 0.0]))
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn validates_params() {
        assert!(TransformParams::default().validate().is_ok());
        let odd = TransformParams {
            buffer_len: 1000,
            ..TransformParams::default()
        };
        assert_eq!(odd.validate(), Err(TransformError::NotPowerOfTwo(1000)));
    }
}
