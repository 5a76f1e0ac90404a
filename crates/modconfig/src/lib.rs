//! Run configuration for Spectrashade.
//!
//! Settings come from two places, applied in this order:
//!
//! 1. the `requests` list of a TOML [`RunConfig`], injected as `#request`
//!    lines of a synthetic unit;
//! 2. the entry file (`rc.glsl` by default), preprocessed with the
//!    [`settings_requests`] table.
//!
//! The resulting [`PipelineSettings`] names the module whose numbered stage
//! files the renderer builds.

mod load;
mod paths;
mod run;
mod settings;

pub use load::{load_settings, resolve_paths, LoadedSettings, SettingsError, INJECTED_ORIGIN};
pub use paths::{AppPaths, PathResolver, ENV_CONFIG_DIR, ENV_DEFAULT_DIR};
pub use run::{BackendKind, BindDecl, BindType, ConfigError, RunConfig};
pub use settings::{settings_requests, PipelineSettings, SETTINGS_REQUESTS};
