//! Stage builder and frame executor for Spectrashade modules.
//!
//! A module is a directory of numbered fragment shaders (`1.frag`, `2.frag`,
//! ...). Each stage is preprocessed, prefixed with a generated header and
//! compiled against a [`GraphicsBackend`]. Every stage except the last renders
//! into an offscreen target that the next stage can sample as `prev`.
//!
//! ```text
//!   Session::open ──▶ load_settings ──▶ StageBuilder::build ──▶ Pipeline
//!                                                                │
//!   RenderLoop::run ──tick──▶ Pipeline::render_tick ──▶ audio chains ──▶ textures ──▶ draw
//! ```
//!
//! Two backends are provided: [`HeadlessBackend`], a recording software
//! implementation used by tests and `backend = "headless"` runs, and the
//! offscreen `wgpu` backend behind the `gpu` feature.

mod backend;
mod diagnostics;
mod external;
#[cfg(feature = "gpu")]
mod gpu;
mod header;
mod headless;
mod pipeline;
mod render_loop;
mod requests;
mod session;
mod stage;
mod types;

pub use backend::{
    BackendError, BackendResult, GraphicsBackend, OffloadId, ProgramId, TargetId, TextureId,
    UniformLocation,
};
pub use diagnostics::{parse_location, remap_log, Diagnostic};
pub use external::{decode_value, ExternalError, ExternalValues};
#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;
pub use header::{external_uniform_name, stage_header, EXTERNAL_PREFIX};
pub use headless::{DrawRecord, HeadlessBackend};
pub use pipeline::{build_module, Pipeline, RenderError, TickReport};
pub use render_loop::RenderLoop;
pub use requests::{
    stage_requests, StageContext, UniformRequest, EXPAND_AVG_FRAMES, EXPAND_CHANNELS,
    EXPAND_UNIFORM_LIMIT,
};
pub use session::{create_backend, Session};
pub use stage::{
    stage_files, BuildError, ShaderStage, StageBuilder, UniformBinding, DISABLE_STAGE_SENTINEL,
    STAGE_EXTENSION,
};
pub use types::{
    lookup_source, BindSource, SourceKind, UniformValue, ValueType, BIND_SOURCES, CHANNEL_COUNT,
};
