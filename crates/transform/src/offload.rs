//! Pass-by-pass software model of the offloaded FFT tail.
//!
//! Each stage mirrors one render pass: a per-texel DFT with the same log
//! compression as [`spectral::fft`](crate::spectral::fft), a max-blend into
//! the decaying accumulation target, and a weighted sum over the rotating
//! history targets. Backends without native offload support evaluate chains
//! with this model so both venues produce the same texture.
use tracing::trace;

use crate::chain::{OffloadTail, TransformKind, TransformParams};
use crate::error::{Result, TransformError};
use crate::spectral::{compress_slot, dft_texel};
use crate::temporal::AverageState;

#[derive(Debug, Clone)]
pub struct OffloadPasses {
    tail: OffloadTail,
    decay: f32,
    fft_scale: f32,
    fft_cutoff: f32,
    avg_window: bool,
    accumulated: Vec<f32>,
    history: AverageState,
}

impl OffloadPasses {
    pub fn new(tail: OffloadTail, params: &TransformParams) -> Self {
        Self {
            tail,
            decay: params.gravity_decay(),
            fft_scale: params.fft_scale,
            fft_cutoff: params.fft_cutoff,
            avg_window: params.avg_window,
            accumulated: vec![0.0; params.buffer_len],
            history: AverageState::new(params.avg_frames, params.buffer_len),
        }
    }

    pub fn tail(&self) -> OffloadTail {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.accumulated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    /// Runs every pass of the tail over one update's input.
    pub fn run(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let len = self.accumulated.len();
        if input.len() != len {
            return Err(TransformError::BufferLength {
                kind: TransformKind::Fft,
                expected: len,
                found: input.len(),
            });
        }
        if len < 2 || !len.is_power_of_two() {
            return Err(TransformError::NotPowerOfTwo(len));
        }

        let mut output: Vec<f32> = (0..len)
            .map(|texel| {
                compress_slot(dft_texel(input, texel), texel, len, self.fft_scale, self.fft_cutoff)
            })
            .collect();

        if self.tail.has_gravity() {
            for (texel, accumulated) in output.iter_mut().zip(self.accumulated.iter_mut()) {
                *accumulated = texel.max(*accumulated) - self.decay;
                *texel = *accumulated;
            }
        }
        if self.tail.has_average() {
            self.history.apply(&mut output, self.avg_window)?;
        }
        trace!(tail = ?self.tail, len, "ran offload passes");
        Ok(output)
    }
}
