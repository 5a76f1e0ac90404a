//! Stateless reshaping of a buffer's value range and spread.

/// Maps `[-1, 1]` onto `[0, 1]`.
pub fn wrange(buffer: &mut [f32]) {
    for sample in buffer {
        *sample = (*sample + 1.0) / 2.0;
    }
}

/// Inclusive log-scale window around index `t`, clamped to the buffer.
pub fn smooth_window(t: usize, len: usize, distance: f32) -> (usize, usize) {
    let last = len.saturating_sub(1) as f32;
    let db = (t as f32).ln();
    let lo = (db - distance).exp().floor().clamp(0.0, last);
    let hi = (db + distance).exp().ceil().clamp(0.0, last);
    (lo as usize, hi as usize)
}

/// Replaces every sample with the mean of the non-zero input samples inside
/// its [`smooth_window`]; a window holding only zeros yields zero.
pub fn smooth(buffer: &mut [f32], distance: f32) {
    let input = buffer.to_vec();
    let len = input.len();
    for (t, sample) in buffer.iter_mut().enumerate() {
        let (lo, hi) = smooth_window(t, len, distance);
        let (sum, count) = input[lo..=hi]
            .iter()
            .filter(|value| **value != 0.0)
            .fold((0.0f32, 0usize), |(sum, count), value| (sum + value, count + 1));
        *sample = if count == 0 { 0.0 } else { sum / count as f32 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn wrange_remaps_unit_interval() {
        let mut buffer = [-1.0, 0.0, 1.0];
        wrange(&mut buffer);
        assert_eq!(buffer, [0.0, 0.5, 1.0]);
    }

    #[test]
    fn window_widens_with_index() {
        assert_eq!(smooth_window(0, 64, 0.5), (0, 0));
        let (lo, hi) = smooth_window(10, 64, 0.5);
        assert_eq!((lo, hi), (6, 17));
        assert_eq!(smooth_window(60, 64, 0.5).1, 63);
    }

    #[test]
    fn smoothing_skips_zero_entries() {
        let mut buffer = vec![0.0; 16];
        buffer[9] = 3.0;
        buffer[11] = 1.0;
        smooth(&mut buffer, 0.2);
        // window of index 10 is 8..=13
        assert_abs_diff_eq!(buffer[10], 2.0, epsilon = 1e-6);
        assert_eq!(buffer[2], 0.0);
    }
}
