//! Windowing and the log-compressed FFT.
use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{Result, TransformError};

const HAMMING_A: f64 = 0.53836;
const HAMMING_B: f64 = 0.46164;

/// Weight of the tapering window at `index` for a window spanning `len` points.
pub fn window_weight(index: usize, len: usize) -> f32 {
    if len < 2 {
        return 1.0;
    }
    (HAMMING_A - HAMMING_B * ((2.0 * PI * index as f64) / (len as f64 - 1.0)).cos()) as f32
}

pub fn window(buffer: &mut [f32]) {
    let len = buffer.len();
    for (index, sample) in buffer.iter_mut().enumerate() {
        *sample *= window_weight(index, len);
    }
}

/// In-place forward transform over `buffer.len() / 2` interleaved complex
/// pairs (`exp(-2πi·jk/M)`).
pub fn fft_in_place(buffer: &mut [f32]) -> Result<()> {
    let n = buffer.len();
    if n < 2 || !n.is_power_of_two() {
        return Err(TransformError::NotPowerOfTwo(n));
    }

    let mut pairs: Vec<Complex<f32>> = buffer
        .chunks_exact(2)
        .map(|pair| Complex::new(pair[0], pair[1]))
        .collect();
    FftPlanner::<f32>::new()
        .plan_fft_forward(pairs.len())
        .process(&mut pairs);
    for (slot, value) in buffer.chunks_exact_mut(2).zip(&pairs) {
        slot[0] = value.re;
        slot[1] = value.im;
    }
    Ok(())
}

/// Log compression and high-frequency boost applied to every output slot.
///
/// Only the absolute value of the slot's own component is taken; real and
/// imaginary parts are never combined into a magnitude.
pub fn compress_slot(value: f32, index: usize, len: usize, fft_scale: f32, fft_cutoff: f32) -> f32 {
    let compressed = (value.abs() + 1.0).ln() / 3.0;
    let boost = ((index as f32 / len as f32) * fft_scale + (1.0 - fft_cutoff)).max(1.0);
    compressed * boost
}

/// The `fft` transform: transform, then compress every slot.
pub fn fft(buffer: &mut [f32], fft_scale: f32, fft_cutoff: f32) -> Result<()> {
    fft_in_place(buffer)?;
    let len = buffer.len();
    for (index, slot) in buffer.iter_mut().enumerate() {
        *slot = compress_slot(*slot, index, len, fft_scale, fft_cutoff);
    }
    Ok(())
}

/// One output texel of the transform computed directly, the way a fragment
/// pass evaluates it: texel `t` is the real (even `t`) or imaginary (odd `t`)
/// part of bin `t / 2`.
pub fn dft_texel(input: &[f32], texel: usize) -> f32 {
    let pairs = input.len() / 2;
    if pairs == 0 {
        return 0.0;
    }
    let bin = (texel / 2) as f64;
    let (mut re, mut im) = (0.0f64, 0.0f64);
    for j in 0..pairs {
        let angle = -2.0 * PI * bin * j as f64 / pairs as f64;
        let (sin, cos) = angle.sin_cos();
        let (xr, xi) = (input[2 * j] as f64, input[2 * j + 1] as f64);
        re += xr * cos - xi * sin;
        im += xr * sin + xi * cos;
    }
    if texel % 2 == 0 {
        re as f32
    } else {
        im as f32
    }
}
