//! Builds the ordered shader stages of a module.
//!
//! A module directory holds `1.frag`, `2.frag`, ... and scanning stops at the
//! first missing number. Each file is preprocessed with the stage request
//! table, prefixed with the generated header and compiled. Every active stage
//! but the last renders offscreen so the next one can sample it as `prev`.
use std::path::{Path, PathBuf};

use modconfig::{BindDecl, PipelineSettings};
use preprocess::{PreprocessError, Preprocessor, SourceMap, SourceUnit};
use thiserror::Error;
use tracing::{debug, info, warn};
use transform::{BindingId, Chain, ChainMode, TransformParams};

use crate::backend::{
    BackendError, GraphicsBackend, OffloadId, ProgramId, TargetId, TextureId, UniformLocation,
};
use crate::diagnostics::{remap_log, Diagnostic};
use crate::header::{external_uniform_name, stage_header};
use crate::requests::{stage_requests, StageContext, UniformRequest};
use crate::types::BindSource;

pub const STAGE_EXTENSION: &str = "frag";

/// Compiler output containing this marker disables the stage instead of
/// failing the build.
pub const DISABLE_STAGE_SENTINEL: &str = "__disablestage";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("no stage files in {} (expected 1.frag)", .dir.display())]
    NoStages { dir: PathBuf },
    #[error("every stage in {} was disabled", .dir.display())]
    AllStagesDisabled { dir: PathBuf },
    #[error("stage {ordinal} ({}) failed to compile:\n{}", .path.display(), join_diagnostics(.diagnostics))]
    Compile {
        ordinal: usize,
        path: PathBuf,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("stage {ordinal}: {source}")]
    Backend {
        ordinal: usize,
        #[source]
        source: BackendError,
    },
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| format!("  {diagnostic}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered stage files, ascending, up to the first gap.
pub fn stage_files(module_dir: &Path) -> Vec<PathBuf> {
    (1..)
        .map(|ordinal| module_dir.join(format!("{ordinal}.{STAGE_EXTENSION}")))
        .take_while(|path| path.is_file())
        .collect()
}

/// A declared uniform resolved against the program and the bind catalog.
#[derive(Debug)]
pub struct UniformBinding {
    pub id: BindingId,
    pub name: String,
    pub source: &'static BindSource,
    /// `None` when the program does not use the uniform.
    pub location: Option<UniformLocation>,
    pub chain: Chain,
    /// Fixed when the binding is created.
    pub mode: ChainMode,
    /// Upload target for audio sources.
    pub texture: Option<TextureId>,
    pub offload: Option<OffloadId>,
}

#[derive(Debug)]
pub struct ShaderStage {
    /// Number of the stage file; disabled stages leave gaps.
    pub ordinal: usize,
    pub path: PathBuf,
    pub program: ProgramId,
    pub bindings: Vec<UniformBinding>,
    /// Index into the run's bind declarations, with the program location.
    pub externals: Vec<(usize, UniformLocation)>,
    pub target: Option<TargetId>,
    /// Colour texture of `target`.
    pub output: Option<TextureId>,
    pub source_map: SourceMap,
}

impl ShaderStage {
    pub fn is_final(&self) -> bool {
        self.target.is_none()
    }

    pub fn binding(&self, name: &str) -> Option<&UniformBinding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    /// Frees everything the stage allocated, newest first.
    pub fn release<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        for binding in self.bindings.iter().rev() {
            if let Some(offload) = binding.offload {
                backend.delete_offload(offload);
            }
            if let Some(texture) = binding.texture {
                backend.delete_texture(texture);
            }
        }
        if let Some(target) = self.target {
            backend.delete_target(target);
        }
        backend.delete_program(self.program);
    }
}

pub struct StageBuilder<'a> {
    settings: &'a PipelineSettings,
    binds: &'a [BindDecl],
    config_dir: Option<PathBuf>,
    default_dir: Option<PathBuf>,
}

impl<'a> StageBuilder<'a> {
    pub fn new(settings: &'a PipelineSettings, binds: &'a [BindDecl]) -> Self {
        Self {
            settings,
            binds,
            config_dir: None,
            default_dir: None,
        }
    }

    /// Root for `#include ":..."` inside stage files.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Root for `#include "@..."` inside stage files.
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    /// Compiles every stage in `module_dir`. On failure, whatever was already
    /// allocated is released before returning.
    pub fn build<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        module_dir: &Path,
    ) -> Result<Vec<ShaderStage>, BuildError> {
        let files = stage_files(module_dir);
        if files.is_empty() {
            return Err(BuildError::NoStages {
                dir: module_dir.to_path_buf(),
            });
        }

        let mut stages = Vec::with_capacity(files.len());
        match self.build_into(backend, module_dir, &files, &mut stages) {
            Ok(()) => {
                info!(
                    module = %module_dir.display(),
                    stages = stages.len(),
                    files = files.len(),
                    "built shader stages"
                );
                Ok(stages)
            }
            Err(err) => {
                for stage in stages.iter().rev() {
                    stage.release(backend);
                }
                Err(err)
            }
        }
    }

    fn build_into<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        module_dir: &Path,
        files: &[PathBuf],
        stages: &mut Vec<ShaderStage>,
    ) -> Result<(), BuildError> {
        let header = stage_header(self.settings, self.binds);
        let requests = stage_requests();
        let preprocessor = Preprocessor::new(&requests);
        let params = self.settings.transform_params();
        let mut next_binding = 0u32;

        for (index, path) in files.iter().enumerate() {
            let ordinal = index + 1;
            let mut unit = SourceUnit::from_file(path)?;
            if let Some(dir) = &self.config_dir {
                unit = unit.with_config_dir(dir);
            }
            if let Some(dir) = &self.default_dir {
                unit = unit.with_default_dir(dir);
            }
            let mut ctx = StageContext::new(self.settings, self.binds);
            let processed = preprocessor.process(unit, &mut ctx)?.with_prefix(&header);

            let label = format!("stage {ordinal}");
            let program = match backend.compile_program(&label, processed.text()) {
                Ok(program) => program,
                Err(BackendError::Compile { log }) if log.contains(DISABLE_STAGE_SENTINEL) => {
                    info!(stage = ordinal, path = %path.display(), "stage disabled");
                    continue;
                }
                Err(BackendError::Compile { log }) => {
                    return Err(BuildError::Compile {
                        ordinal,
                        path: path.clone(),
                        diagnostics: remap_log(&log, processed.source_map()),
                    });
                }
                Err(source) => return Err(BuildError::Backend { ordinal, source }),
            };
            debug!(stage = ordinal, path = %path.display(), "compiled stage");

            let (_, source_map) = processed.into_parts();
            let mut stage = ShaderStage {
                ordinal,
                path: path.clone(),
                program,
                bindings: Vec::new(),
                externals: Vec::new(),
                target: None,
                output: None,
                source_map,
            };
            let attached = self.attach_bindings(
                backend,
                &mut stage,
                ctx.into_uniforms(),
                &params,
                &mut next_binding,
            );
            stages.push(stage);
            attached.map_err(|source| BuildError::Backend { ordinal, source })?;
        }

        let Some(last) = stages.len().checked_sub(1) else {
            return Err(BuildError::AllStagesDisabled {
                dir: module_dir.to_path_buf(),
            });
        };
        let (width, height) = backend.screen_size();
        for stage in &mut stages[..last] {
            let ordinal = stage.ordinal;
            let wrap = |source| BuildError::Backend { ordinal, source };
            let target = backend.create_target(width, height).map_err(wrap)?;
            stage.target = Some(target);
            stage.output = Some(backend.target_texture(target).map_err(wrap)?);
        }
        Ok(())
    }

    fn attach_bindings<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        stage: &mut ShaderStage,
        uniforms: Vec<UniformRequest>,
        params: &TransformParams,
        next_binding: &mut u32,
    ) -> Result<(), BackendError> {
        for uniform in uniforms {
            let location = backend.uniform_location(stage.program, &uniform.name);
            if location.is_none() {
                warn!(
                    stage = stage.ordinal,
                    uniform = %uniform.name,
                    "bound uniform is not used by the program"
                );
            }
            let audio = uniform.source.kind.is_audio();
            let mode = if audio {
                ChainMode::decide(&uniform.chain, self.settings.accel_fft, backend.supports_offload())
            } else {
                ChainMode::Cpu
            };
            let texture = if audio {
                Some(backend.create_texture_1d(params.buffer_len)?)
            } else {
                None
            };
            let id = BindingId(*next_binding);
            *next_binding += 1;
            stage.bindings.push(UniformBinding {
                id,
                name: uniform.name,
                source: uniform.source,
                location,
                chain: uniform.chain,
                mode,
                texture,
                offload: None,
            });
            if let ChainMode::GpuOffloaded { tail, .. } = mode {
                let offload = backend.create_offload(tail, params)?;
                if let Some(binding) = stage.bindings.last_mut() {
                    binding.offload = Some(offload);
                }
            }
        }

        for (index, bind) in self.binds.iter().enumerate() {
            let name = external_uniform_name(&bind.name);
            if let Some(location) = backend.uniform_location(stage.program, &name) {
                stage.externals.push((index, location));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_stops_at_first_gap() {
        let dir = TempDir::new().unwrap();
        for name in ["1.frag", "2.frag", "4.frag", "notes.txt"] {
            fs::write(dir.path().join(name), "void main() {}\n").unwrap();
        }
        let files = stage_files(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("1.frag"), dir.path().join("2.frag")]
        );
    }

    #[test]
    fn empty_module_has_no_stages() {
        let dir = TempDir::new().unwrap();
        let mut backend = crate::HeadlessBackend::new(8, 8);
        let settings = PipelineSettings::default();
        let err = StageBuilder::new(&settings, &[])
            .build(&mut backend, dir.path())
            .unwrap_err();
        assert!(matches!(err, BuildError::NoStages { .. }));
    }
}
