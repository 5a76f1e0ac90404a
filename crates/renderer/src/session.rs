//! One configured run: settings, backend, pipeline and audio region.
use anyhow::{bail, Context, Result};
use modconfig::{load_settings, resolve_paths, BackendKind, LoadedSettings, PathResolver, RunConfig};
use tracing::info;
use transform::{Liveness, SharedAudio};

use crate::backend::GraphicsBackend;
use crate::external::ExternalValues;
use crate::headless::HeadlessBackend;
use crate::pipeline::Pipeline;
use crate::render_loop::RenderLoop;
use crate::stage::StageBuilder;

pub struct Session {
    backend: Box<dyn GraphicsBackend>,
    pipeline: Option<Pipeline>,
    loaded: LoadedSettings,
    audio: SharedAudio,
    liveness: Liveness,
    run: RunConfig,
}

impl Session {
    /// Loads settings for `run` and builds its module on the configured
    /// backend, rendering at `width`x`height`.
    pub fn open(run: &RunConfig, resolver: &PathResolver, width: u32, height: u32) -> Result<Self> {
        let backend = create_backend(run.backend, width, height)?;
        Self::with_backend(run, resolver, backend)
    }

    pub fn with_backend(
        run: &RunConfig,
        resolver: &PathResolver,
        mut backend: Box<dyn GraphicsBackend>,
    ) -> Result<Self> {
        let paths = resolve_paths(run, resolver)?;
        let loaded = load_settings(run, &paths).context("failed to load settings")?;
        let externals = ExternalValues::new(&run.binds).context("invalid bind value")?;
        let builder = StageBuilder::new(&loaded.settings, &run.binds)
            .with_config_dir(paths.config_dir())
            .with_default_dir(paths.default_dir());
        let pipeline = Pipeline::build(
            backend.as_mut(),
            &loaded.module_dir,
            builder,
            loaded.settings.clone(),
            externals,
        )
        .with_context(|| format!("failed to build module '{}'", loaded.settings.module))?;
        let audio = SharedAudio::new(loaded.settings.buffer_size);
        info!(
            module = %loaded.settings.module,
            stages = pipeline.stages().len(),
            "session ready"
        );
        Ok(Self {
            backend,
            pipeline: Some(pipeline),
            loaded,
            audio,
            liveness: Liveness::new(),
            run: run.clone(),
        })
    }

    pub fn settings(&self) -> &LoadedSettings {
        &self.loaded
    }

    /// Shared region an audio producer publishes into.
    pub fn audio(&self) -> &SharedAudio {
        &self.audio
    }

    /// Clearing the returned flag stops [`Session::run`].
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn externals(&self) -> Option<&ExternalValues> {
        self.pipeline.as_ref().map(Pipeline::externals)
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    /// Renders until stopped or until the run's duration elapses.
    pub fn run(&mut self) -> Result<u64> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            bail!("session has already been shut down");
        };
        let render_loop = RenderLoop::new(self.loaded.settings.frame_rate, self.liveness.clone())
            .with_limit(self.run.duration);
        let ticks = render_loop.run(pipeline, self.backend.as_mut(), &self.audio)?;
        Ok(ticks)
    }

    pub fn shutdown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.teardown(self.backend.as_mut());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn create_backend(kind: BackendKind, width: u32, height: u32) -> Result<Box<dyn GraphicsBackend>> {
    match kind {
        BackendKind::Headless => Ok(Box::new(HeadlessBackend::new(width, height))),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(crate::gpu::GpuBackend::new(width, height)?)),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => bail!("the gpu backend needs the `gpu` feature"),
    }
}
