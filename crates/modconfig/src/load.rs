use std::path::PathBuf;

use anyhow::Result;
use preprocess::{PreprocessError, Preprocessor, SourceUnit};
use tracing::{debug, info};

use crate::paths::{AppPaths, PathResolver};
use crate::run::RunConfig;
use crate::settings::{settings_requests, PipelineSettings};

/// Origin reported for requests injected from the run file.
pub const INJECTED_ORIGIN: &str = "<requests>";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("entry file '{}' not found (searched {})", .entry.display(), display_paths(.searched))]
    EntryNotFound {
        entry: PathBuf,
        searched: Vec<PathBuf>,
    },
    #[error("module '{name}' not found (searched {})", display_paths(.searched))]
    ModuleNotFound { name: String, searched: Vec<PathBuf> },
    #[error("invalid pipeline settings: {0}")]
    Invalid(#[from] transform::TransformError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Settings plus the module they selected.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: PipelineSettings,
    pub entry: PathBuf,
    pub module_dir: PathBuf,
}

/// Directories for a run: explicit run-file values win over discovery.
pub fn resolve_paths(run: &RunConfig, resolver: &PathResolver) -> Result<AppPaths> {
    let explicit = |value: &Option<String>| value.as_deref().map(|raw| resolver.resolve(raw)).transpose();
    let config_dir = explicit(&run.config_dir)?;
    let default_dir = explicit(&run.default_dir)?;
    if let (Some(config_dir), Some(default_dir)) = (&config_dir, &default_dir) {
        return Ok(AppPaths::from_raw(config_dir.clone(), default_dir.clone()));
    }
    let discovered = AppPaths::discover()?;
    Ok(AppPaths::from_raw(
        config_dir.unwrap_or_else(|| discovered.config_dir().to_path_buf()),
        default_dir.unwrap_or_else(|| discovered.default_dir().to_path_buf()),
    ))
}

/// Applies injected requests, then the entry file, and locates the module.
pub fn load_settings(run: &RunConfig, paths: &AppPaths) -> Result<LoadedSettings, SettingsError> {
    let requests = settings_requests();
    let preprocessor = Preprocessor::new(&requests);
    let mut settings = PipelineSettings::default();

    if !run.requests.is_empty() {
        let text: String = run
            .requests
            .iter()
            .map(|request| format!("#request {request}\n"))
            .collect();
        let unit = SourceUnit::from_text(INJECTED_ORIGIN, text)
            .with_config_dir(paths.config_dir())
            .with_default_dir(paths.default_dir());
        preprocessor.process(unit, &mut settings)?;
        debug!(count = run.requests.len(), "applied injected requests");
    }

    let entry_name = run.entry_path();
    let searched = paths.entry_candidates(&entry_name);
    let entry = searched
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .ok_or_else(|| SettingsError::EntryNotFound {
            entry: entry_name.clone(),
            searched: searched.clone(),
        })?;
    let unit = SourceUnit::from_file(&entry)?
        .with_config_dir(paths.config_dir())
        .with_default_dir(paths.default_dir());
    preprocessor.process(unit, &mut settings)?;

    settings.transform_params().validate()?;

    let searched = paths.module_candidates(&settings.module);
    let module_dir = searched
        .iter()
        .find(|candidate| candidate.is_dir())
        .cloned()
        .ok_or_else(|| SettingsError::ModuleNotFound {
            name: settings.module.clone(),
            searched: searched.to_vec(),
        })?;

    info!(
        entry = %entry.display(),
        module = %settings.module,
        dir = %module_dir.display(),
        frame_rate = settings.frame_rate,
        "loaded settings"
    );
    Ok(LoadedSettings {
        settings,
        entry,
        module_dir,
    })
}
