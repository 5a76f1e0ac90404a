//! Seam between the frame pipeline and a graphics context.
//!
//! Handles are opaque integers allocated by the backend. A program is always
//! linked against the backend's built-in full-screen vertex stage, so callers
//! only ever supply fragment source.
use thiserror::Error;
use transform::{OffloadTail, TransformError, TransformParams};

use crate::types::UniformValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OffloadId(pub u32);

/// Location of an active uniform within one program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Error)]
pub enum BackendError {
    /// The compiler rejected the program; `log` is its raw diagnostic output.
    #[error("shader compilation failed:\n{log}")]
    Compile { log: String },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
    #[error("no program is bound")]
    NoProgram,
    #[error("texture holds {expected} values, upload had {found}")]
    UploadSize { expected: usize, found: usize },
    #[error("uniform {location} cannot hold {value:?}")]
    UniformType { location: u32, value: UniformValue },
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("graphics device error: {0}")]
    Device(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

pub trait GraphicsBackend {
    /// Compiles `fragment` and links it with the full-screen vertex stage.
    fn compile_program(&mut self, label: &str, fragment: &str) -> BackendResult<ProgramId>;

    /// `None` when the program does not declare (or never uses) `name`.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Offscreen framebuffer with a sampleable colour texture.
    fn create_target(&mut self, width: u32, height: u32) -> BackendResult<TargetId>;

    fn target_texture(&self, target: TargetId) -> BackendResult<TextureId>;

    /// Single-channel float texture of `len` texels.
    fn create_texture_1d(&mut self, len: usize) -> BackendResult<TextureId>;

    /// Zero-filled RGBA texture.
    fn create_texture_2d(&mut self, width: u32, height: u32) -> BackendResult<TextureId>;

    fn upload_texture_1d(&mut self, texture: TextureId, data: &[f32]) -> BackendResult<()>;

    /// `None` selects the default (screen) target.
    fn bind_target(&mut self, target: Option<TargetId>) -> BackendResult<()>;

    fn clear(&mut self, rgba: [f32; 4]) -> BackendResult<()>;

    fn use_program(&mut self, program: ProgramId) -> BackendResult<()>;

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) -> BackendResult<()>;

    fn draw_fullscreen(&mut self) -> BackendResult<()>;

    fn screen_size(&self) -> (u32, u32);

    fn supports_offload(&self) -> bool {
        false
    }

    /// Prepares GPU passes for an FFT chain tail.
    fn create_offload(
        &mut self,
        _tail: OffloadTail,
        _params: &TransformParams,
    ) -> BackendResult<OffloadId> {
        Err(BackendError::Unsupported("chain offload"))
    }

    /// Runs the passes on `input` and leaves the result in `output`.
    fn run_offload(
        &mut self,
        _offload: OffloadId,
        _input: &[f32],
        _output: TextureId,
    ) -> BackendResult<()> {
        Err(BackendError::Unsupported("chain offload"))
    }

    fn delete_offload(&mut self, _offload: OffloadId) {}

    fn delete_program(&mut self, program: ProgramId);

    fn delete_target(&mut self, target: TargetId);

    fn delete_texture(&mut self, texture: TextureId);
}
