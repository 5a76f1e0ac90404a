//! Transforms that carry state from one update to the next.
use crate::chain::TransformKind;
use std::f64::consts::PI;

use crate::error::{Result, TransformError};

/// Per-update decay for a configured gravity step.
pub fn decay_per_update(gravity_step: f32, update_rate: f32) -> f32 {
    gravity_step / update_rate
}

fn check_len(kind: TransformKind, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(TransformError::BufferLength {
            kind,
            expected,
            found,
        });
    }
    Ok(())
}

/// Last applied value per index; starts at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct GravityState {
    applied: Vec<f32>,
}

impl GravityState {
    pub fn new(len: usize) -> Self {
        Self {
            applied: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn applied(&self) -> &[f32] {
        &self.applied
    }

    /// Rising input resets the index to `input - decay`; falling input lets
    /// the previous value sink by `decay`.
    pub fn apply(&mut self, buffer: &mut [f32], decay: f32) -> Result<()> {
        check_len(TransformKind::Gravity, self.applied.len(), buffer.len())?;
        for (sample, applied) in buffer.iter_mut().zip(self.applied.iter_mut()) {
            if *sample >= *applied {
                *applied = *sample - decay;
            } else {
                *applied -= decay;
            }
            *sample = *applied;
        }
        Ok(())
    }
}

/// Ring of the most recent buffers, zero-filled until enough updates arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageState {
    history: Vec<Vec<f32>>,
    next: usize,
}

impl AverageState {
    pub fn new(frames: usize, len: usize) -> Self {
        Self {
            history: vec![vec![0.0; len]; frames.max(1)],
            next: 0,
        }
    }

    pub fn frames(&self) -> usize {
        self.history.len()
    }

    pub fn len(&self) -> usize {
        self.history.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply(&mut self, buffer: &mut [f32], windowed: bool) -> Result<()> {
        check_len(TransformKind::Average, self.len(), buffer.len())?;
        let frames = self.history.len();
        if frames == 1 {
            // identity: remember the frame and leave the buffer untouched
            self.history[0].copy_from_slice(buffer);
            return Ok(());
        }
        self.history[self.next].copy_from_slice(buffer);
        self.next = (self.next + 1) % frames;

        // age 0 is the oldest frame, which sits at `next` after the write
        let weights: Vec<f32> = (0..frames)
            .map(|age| if windowed { hann_weight(age, frames) } else { 1.0 })
            .collect();
        let total: f32 = weights.iter().sum();
        for (index, sample) in buffer.iter_mut().enumerate() {
            let sum: f32 = weights
                .iter()
                .enumerate()
                .map(|(age, weight)| self.history[(self.next + age) % frames][index] * weight)
                .sum();
            *sample = sum / total;
        }
        Ok(())
    }
}

/// Hann weight for the frame of the given age in a history of `frames`.
///
/// The window spans `frames + 2` points with both zero endpoints dropped, so
/// every stored frame contributes and a two-frame history is not all zeros.
pub fn hann_weight(age: usize, frames: usize) -> f32 {
    if frames < 2 {
        return 1.0;
    }
    let phase = 2.0 * PI * (age as f64 + 1.0) / (frames as f64 + 1.0);
    (0.5 - 0.5 * phase.cos()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gravity_decays_towards_held_input() {
        let mut state = GravityState::new(1);
        let decay = decay_per_update(4.0, 40.0);

        let mut first = [1.0];
        state.apply(&mut first, decay).unwrap();
        assert_abs_diff_eq!(first[0], 0.9, epsilon = 1e-6);

        // a drop to 0.5 sinks one step per update until the input is reached
        let mut values = Vec::new();
        for _ in 0..6 {
            let mut held = [0.5];
            state.apply(&mut held, decay).unwrap();
            values.push(held[0]);
        }
        assert_abs_diff_eq!(values[0], 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(values[1], 0.7, epsilon = 1e-6);
        assert_abs_diff_eq!(values[2], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(values[3], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(values[4], 0.4, epsilon = 1e-5);
        assert_abs_diff_eq!(values[5], 0.4, epsilon = 1e-5);
    }

    #[test]
    fn gravity_rejects_resized_buffers() {
        let mut state = GravityState::new(4);
        let err = state.apply(&mut [0.0; 8], 0.1).unwrap_err();
        assert_eq!(
            err,
            TransformError::BufferLength {
                kind: TransformKind::Gravity,
                expected: 4,
                found: 8
            }
        );
    }

    #[test]
    fn single_frame_average_is_identity() {
        let mut state = AverageState::new(1, 4);
        for round in 0..3 {
            let input = [round as f32, 0.25, -1.0, 7.5];
            let mut buffer = input;
            state.apply(&mut buffer, true).unwrap();
            assert_eq!(buffer, input);
        }
    }

    #[test]
    fn average_fills_from_zero() {
        let mut state = AverageState::new(4, 2);
        let mut buffer = [4.0, 8.0];
        state.apply(&mut buffer, false).unwrap();
        assert_eq!(buffer, [1.0, 2.0]);
        for _ in 0..3 {
            buffer = [4.0, 8.0];
            state.apply(&mut buffer, false).unwrap();
        }
        assert_eq!(buffer, [4.0, 8.0]);
    }

    #[test]
    fn hann_weights_are_symmetric_and_positive() {
        let weights: Vec<f32> = (0..4).map(|age| hann_weight(age, 4)).collect();
        assert!(weights.iter().all(|weight| *weight > 0.0));
        assert_abs_diff_eq!(weights[0], weights[3], epsilon = 1e-6);
        assert_abs_diff_eq!(weights[1], weights[2], epsilon = 1e-6);
        assert!(weights[1] > weights[0]);
        assert!(hann_weight(0, 2) > 0.0);
    }

    #[test]
    fn windowed_average_keeps_a_constant_input() {
        let mut state = AverageState::new(4, 2);
        let mut buffer = [0.0, 0.0];
        for _ in 0..4 {
            buffer = [1.0, -2.0];
            state.apply(&mut buffer, true).unwrap();
        }
        assert_abs_diff_eq!(buffer[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(buffer[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn windowed_average_ignores_ring_phase() {
        // the same last four frames must give the same output however many
        // updates came before them
        let run = |leading_zeros: usize| {
            let mut state = AverageState::new(4, 1);
            let mut buffer = [0.0];
            for _ in 0..leading_zeros {
                buffer = [0.0];
                state.apply(&mut buffer, true).unwrap();
            }
            for value in [0.0, 0.0, 0.0, 1.0] {
                buffer = [value];
                state.apply(&mut buffer, true).unwrap();
            }
            buffer[0]
        };
        let expected = hann_weight(3, 4) / (0..4).map(|age| hann_weight(age, 4)).sum::<f32>();
        for leading_zeros in 0..6 {
            assert_abs_diff_eq!(run(leading_zeros), expected, epsilon = 1e-6);
        }
    }
}
