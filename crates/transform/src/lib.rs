//! Per-frame audio transform pipeline.
//!
//! Raw two-channel audio flows through named transforms attached to a
//! shader uniform, in declaration order:
//!
//! ```text
//!   SharedAudio ──snapshot──▶ Keyframes (optional blend) ──▶ Chain::run ──▶ texture payload
//!                                                            │
//!                                  window, fft, gravity, avg, wrange, smooth
//! ```
//!
//! `gravity` and `avg` keep per-binding state in a [`StateStore`]. A chain
//! ending in `fft`, `fft gravity`, or `fft gravity avg` can have that tail
//! executed as GPU passes instead; [`ChainMode`] records the choice once per
//! binding and [`OffloadPasses`] models those passes in software.

mod audio;
mod chain;
mod error;
mod interpolate;
mod offload;
mod shape;
mod spectral;
mod temporal;

pub use audio::{AudioFrame, AudioProducer, AudioSnapshot, Liveness, SharedAudio};
pub use chain::{
    BindingId, Chain, ChainMemo, ChainMode, OffloadTail, StateKey, StateStore, TransformKind,
    TransformParams, TransformState,
};
pub use error::{Result, TransformError};
pub use interpolate::{blend_factor, Keyframes};
pub use offload::OffloadPasses;
pub use shape::{smooth, smooth_window, wrange};
pub use spectral::{compress_slot, dft_texel, fft, fft_in_place, window, window_weight};
pub use temporal::{decay_per_update, hann_weight, AverageState, GravityState};
