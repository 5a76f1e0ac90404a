#![cfg(feature = "gpu")]

use approx::assert_abs_diff_eq;
use renderer::{GpuBackend, GraphicsBackend};
use transform::{OffloadPasses, OffloadTail, TransformParams};

const LEN: usize = 64;

/// `None` on machines without an adapter that can blend float targets.
fn backend() -> Option<GpuBackend> {
    match GpuBackend::new(8, 8) {
        Ok(backend) if backend.supports_offload() => Some(backend),
        Ok(_) => {
            eprintln!("skipping: adapter cannot blend R32Float targets");
            None
        }
        Err(err) => {
            eprintln!("skipping: no GPU adapter ({err:#})");
            None
        }
    }
}

fn signal(seed: f32) -> Vec<f32> {
    (0..LEN)
        .map(|i| ((i as f32) * 0.21 + seed).sin() * 0.8)
        .collect()
}

fn check_tail(tail: OffloadTail) {
    let Some(mut backend) = backend() else {
        return;
    };
    let params = TransformParams {
        buffer_len: LEN,
        avg_frames: 4,
        ..TransformParams::default()
    };
    let output = backend.create_texture_1d(LEN).unwrap();
    let offload = backend.create_offload(tail, &params).unwrap();
    let mut model = OffloadPasses::new(tail, &params);

    for update in 0..6 {
        let input = signal(update as f32 * 0.7);
        backend.run_offload(offload, &input, output).unwrap();
        let expected = model.run(&input).unwrap();
        let actual = backend.read_texture_1d(output).unwrap();
        assert_eq!(actual.len(), LEN);
        for (a, b) in actual.iter().zip(&expected) {
            assert_abs_diff_eq!(*a, *b, epsilon = 2e-3);
        }
    }
    backend.delete_offload(offload);
    backend.delete_texture(output);
}

#[test]
fn fft_pass_matches_the_software_passes() {
    check_tail(OffloadTail::Fft);
}

#[test]
fn blended_history_matches_the_software_passes() {
    check_tail(OffloadTail::FftGravityAverage);
}

#[test]
fn offload_rejects_a_mismatched_output() {
    let Some(mut backend) = backend() else {
        return;
    };
    let params = TransformParams {
        buffer_len: LEN,
        ..TransformParams::default()
    };
    let output = backend.create_texture_1d(LEN / 2).unwrap();
    let offload = backend.create_offload(OffloadTail::Fft, &params).unwrap();
    assert!(backend.run_offload(offload, &[0.0; LEN], output).is_err());
}
