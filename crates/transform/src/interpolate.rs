//! Keyframe blending between audio updates.
//!
//! Audio updates arrive slower than frames are drawn, so each channel keeps a
//! start and an end keyframe and renders a linear blend between them.

/// Blend weight of the end keyframe `ticks` frames after the last update.
pub fn blend_factor(update_rate: f32, frame_rate: f32, ticks: u32) -> f32 {
    if frame_rate <= 0.0 {
        return 1.0;
    }
    let blend = (update_rate as f64 * ticks as f64) / frame_rate as f64;
    blend.min(1.0) as f32
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyframes {
    start: Vec<f32>,
    end: Vec<f32>,
    ticks: u32,
}

impl Keyframes {
    pub fn new(len: usize) -> Self {
        Self {
            start: vec![0.0; len],
            end: vec![0.0; len],
            ticks: 0,
        }
    }

    pub fn ticks_since_update(&self) -> u32 {
        self.ticks
    }

    /// Writes the blended samples for the current tick into `out`.
    pub fn sample_into(&self, out: &mut [f32], update_rate: f32, frame_rate: f32) {
        let blend = blend_factor(update_rate, frame_rate, self.ticks);
        for ((out, start), end) in out.iter_mut().zip(&self.start).zip(&self.end) {
            *out = start + (end - start) * blend;
        }
    }

    /// Previous end becomes the new start; `fresh` becomes the new end.
    pub fn rotate(&mut self, fresh: &[f32]) {
        std::mem::swap(&mut self.start, &mut self.end);
        let n = self.end.len().min(fresh.len());
        self.end[..n].copy_from_slice(&fresh[..n]);
        self.ticks = 0;
    }

    pub fn advance(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_clamps_at_one() {
        assert_eq!(blend_factor(30.0, 60.0, 0), 0.0);
        assert_eq!(blend_factor(30.0, 60.0, 1), 0.5);
        assert_eq!(blend_factor(30.0, 60.0, 2), 1.0);
        assert_eq!(blend_factor(30.0, 60.0, 7), 1.0);
        assert_eq!(blend_factor(22_050.0 / 1024.0, 60.0, 3), 1.0);
    }

    #[test]
    fn keyframes_walk_towards_new_sample() {
        let mut keys = Keyframes::new(2);
        keys.rotate(&[2.0, 4.0]);
        keys.rotate(&[4.0, 8.0]);

        let mut out = [0.0; 2];
        keys.sample_into(&mut out, 20.0, 80.0);
        assert_eq!(out, [2.0, 4.0]);
        keys.advance();
        keys.sample_into(&mut out, 20.0, 80.0);
        assert_eq!(out, [2.5, 5.0]);
        for _ in 0..10 {
            keys.advance();
        }
        keys.sample_into(&mut out, 20.0, 80.0);
        assert_eq!(out, [4.0, 8.0]);
    }
}
