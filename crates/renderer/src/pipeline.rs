//! Per-tick execution of the built stages.
use std::path::Path;
use std::time::Instant;

use modconfig::{BindDecl, PipelineSettings};
use thiserror::Error;
use tracing::{debug, trace};
use transform::{
    AudioSnapshot, ChainMemo, ChainMode, Keyframes, SharedAudio, StateStore, TransformError,
    TransformParams,
};

use crate::backend::{BackendError, GraphicsBackend, TextureId};
use crate::external::{ExternalError, ExternalValues};
use crate::stage::{BuildError, ShaderStage, StageBuilder, UniformBinding};
use crate::types::{SourceKind, UniformValue, CHANNEL_COUNT};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("stage {ordinal}: {source}")]
    Backend {
        ordinal: usize,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    External(#[from] ExternalError),
}

/// Summary of one rendered tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// A new audio update arrived since the previous tick.
    pub fresh: bool,
    pub interpolated: bool,
    pub stages_drawn: usize,
}

/// Stages plus everything that persists between ticks: transform state,
/// interpolation keyframes and the private audio snapshot.
///
/// The pipeline never owns the backend; every call that touches GPU
/// resources takes it explicitly, and [`Pipeline::teardown`] frees them.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<ShaderStage>,
    settings: PipelineSettings,
    params: TransformParams,
    store: StateStore,
    memo: ChainMemo<SourceKind>,
    snapshot: AudioSnapshot,
    keyframes: [Keyframes; CHANNEL_COUNT],
    inputs: [Vec<f32>; CHANNEL_COUNT],
    staging: Vec<f32>,
    externals: ExternalValues,
    external_values: Vec<UniformValue>,
    /// Sampled as `prev` by the first stage.
    placeholder: TextureId,
    offloaded: bool,
    started: Instant,
    tick: u64,
}

impl Pipeline {
    /// Builds the module's stages and wraps them.
    pub fn build<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        module_dir: &Path,
        builder: StageBuilder<'_>,
        settings: PipelineSettings,
        externals: ExternalValues,
    ) -> Result<Self, BuildError> {
        let stages = builder.build(backend, module_dir)?;
        Self::new(backend, stages, settings, externals)
    }

    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        stages: Vec<ShaderStage>,
        settings: PipelineSettings,
        externals: ExternalValues,
    ) -> Result<Self, BuildError> {
        let placeholder = match backend.create_texture_2d(1, 1) {
            Ok(texture) => texture,
            Err(source) => {
                for stage in stages.iter().rev() {
                    stage.release(backend);
                }
                return Err(BuildError::Backend { ordinal: 0, source });
            }
        };
        let params = settings.transform_params();
        let len = params.buffer_len;
        let offloaded = stages
            .iter()
            .flat_map(|stage| &stage.bindings)
            .any(|binding| binding.mode.is_offloaded());
        if offloaded && settings.interpolate {
            debug!("interpolation disabled: chain tails run on the GPU");
        }
        Ok(Self {
            stages,
            settings,
            params,
            store: StateStore::new(),
            memo: ChainMemo::new(),
            snapshot: AudioSnapshot::new(len),
            keyframes: [Keyframes::new(len), Keyframes::new(len)],
            inputs: [vec![0.0; len], vec![0.0; len]],
            staging: Vec::with_capacity(len),
            externals,
            external_values: Vec::new(),
            placeholder,
            offloaded,
            started: Instant::now(),
            tick: 0,
        })
    }

    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Handle for pushing external value updates.
    pub fn externals(&self) -> &ExternalValues {
        &self.externals
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Keyframe blending is off whenever any chain tail is offloaded.
    pub fn interpolating(&self) -> bool {
        self.settings.interpolate && !self.offloaded
    }

    /// Renders every stage once.
    pub fn render_tick<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        audio: &SharedAudio,
    ) -> Result<TickReport, RenderError> {
        audio.snapshot_into(&mut self.snapshot)?;
        self.externals.snapshot_into(&mut self.external_values)?;
        self.memo.clear();

        let interpolating = self.interpolating();
        let update_rate = self.settings.update_rate();
        let frame_rate = self.settings.frame_rate as f32;
        let channels = [&self.snapshot.frame.left, &self.snapshot.frame.right];
        for (channel, samples) in channels.into_iter().enumerate() {
            if interpolating {
                self.keyframes[channel].sample_into(&mut self.inputs[channel], update_rate, frame_rate);
            } else {
                copy_clamped(&mut self.inputs[channel], samples);
            }
        }
        // Without blending the inputs only change on a fresh update.
        let refresh = interpolating || self.snapshot.fresh || self.tick == 0;
        let elapsed = self.started.elapsed().as_secs_f32();
        let (width, height) = backend.screen_size();

        let mut previous: Option<TextureId> = None;
        let mut drawn = 0;
        for stage in &self.stages {
            let ordinal = stage.ordinal;
            let wrap = |source| RenderError::Backend { ordinal, source };
            backend.bind_target(stage.target).map_err(wrap)?;
            if let Some(background) = &self.settings.background {
                backend.clear(background.rgba).map_err(wrap)?;
            }
            backend.use_program(stage.program).map_err(wrap)?;

            for binding in &stage.bindings {
                let value = match binding.source.kind {
                    SourceKind::PrevTexture => {
                        UniformValue::Texture(previous.unwrap_or(self.placeholder))
                    }
                    SourceKind::AudioLeft | SourceKind::AudioRight => {
                        let Some(texture) = binding.texture else {
                            continue;
                        };
                        if refresh {
                            let channel = usize::from(binding.source.kind == SourceKind::AudioRight);
                            upload_audio(
                                backend,
                                ordinal,
                                binding,
                                texture,
                                &self.inputs[channel],
                                &self.params,
                                &mut self.store,
                                &mut self.memo,
                                &mut self.staging,
                            )?;
                        }
                        UniformValue::Texture(texture)
                    }
                    SourceKind::AudioLength => UniformValue::Int(self.params.buffer_len as i32),
                    SourceKind::ScreenSize => UniformValue::IVec2([width as i32, height as i32]),
                    SourceKind::Time => UniformValue::Float(elapsed),
                };
                if let Some(location) = binding.location {
                    backend.set_uniform(location, value).map_err(wrap)?;
                }
            }
            for (index, location) in &stage.externals {
                if let Some(value) = self.external_values.get(*index) {
                    backend.set_uniform(*location, *value).map_err(wrap)?;
                }
            }

            backend.draw_fullscreen().map_err(wrap)?;
            drawn += 1;
            previous = stage.output;
        }

        if interpolating {
            if self.snapshot.fresh {
                self.keyframes[0].rotate(&self.snapshot.frame.left);
                self.keyframes[1].rotate(&self.snapshot.frame.right);
            } else {
                for keys in &mut self.keyframes {
                    keys.advance();
                }
            }
        }

        let report = TickReport {
            tick: self.tick,
            fresh: self.snapshot.fresh,
            interpolated: interpolating,
            stages_drawn: drawn,
        };
        trace!(tick = report.tick, fresh = report.fresh, "rendered tick");
        self.tick += 1;
        Ok(report)
    }

    /// Frees every stage in reverse build order, then the placeholder.
    pub fn teardown<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for stage in self.stages.iter().rev() {
            stage.release(backend);
        }
        backend.delete_texture(self.placeholder);
        debug!(ticks = self.tick, "pipeline torn down");
    }
}

/// Builds the pipeline for a module using the settings' directories.
pub fn build_module<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    module_dir: &Path,
    settings: &PipelineSettings,
    binds: &[BindDecl],
    externals: ExternalValues,
) -> Result<Pipeline, BuildError> {
    let builder = StageBuilder::new(settings, binds);
    Pipeline::build(backend, module_dir, builder, settings.clone(), externals)
}

#[allow(clippy::too_many_arguments)]
fn upload_audio<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    ordinal: usize,
    binding: &UniformBinding,
    texture: TextureId,
    input: &[f32],
    params: &TransformParams,
    store: &mut StateStore,
    memo: &mut ChainMemo<SourceKind>,
    staging: &mut Vec<f32>,
) -> Result<(), RenderError> {
    let wrap = |source| RenderError::Backend { ordinal, source };
    match binding.mode {
        ChainMode::Cpu if binding.chain.is_empty() => {
            backend.upload_texture_1d(texture, input).map_err(wrap)
        }
        ChainMode::Cpu => {
            let output = memo.get_or_try_insert(&binding.source.kind, &binding.chain, || {
                let mut buffer = input.to_vec();
                binding.chain.run(binding.id, &mut buffer, params, store)?;
                Ok(buffer)
            })?;
            backend.upload_texture_1d(texture, output).map_err(wrap)
        }
        mode @ ChainMode::GpuOffloaded { .. } => {
            let offload = binding
                .offload
                .ok_or(BackendError::Unsupported("chain offload"))
                .map_err(wrap)?;
            staging.clear();
            staging.extend_from_slice(input);
            binding.chain.run_steps(
                mode.cpu_steps(&binding.chain),
                binding.id,
                staging,
                params,
                store,
            )?;
            backend.run_offload(offload, staging, texture).map_err(wrap)
        }
    }
}

fn copy_clamped(dst: &mut [f32], src: &[f32]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}
