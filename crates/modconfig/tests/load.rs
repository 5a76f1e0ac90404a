use std::fs;
use std::path::Path;

use modconfig::{load_settings, AppPaths, RunConfig, SettingsError};
use preprocess::{ParseErrorKind, PreprocessError};

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, contents).expect("write file");
}

fn layout() -> (tempfile::TempDir, AppPaths) {
    let temp = tempfile::tempdir().unwrap();
    let config = temp.path().join("config");
    let share = temp.path().join("share");
    fs::create_dir_all(&config).unwrap();
    fs::create_dir_all(&share).unwrap();
    let paths = AppPaths::from_raw(config, share);
    (temp, paths)
}

#[test]
fn entry_selects_module_with_fallback_to_defaults() {
    let (_temp, paths) = layout();
    write(
        paths.config_dir(),
        "rc.glsl",
        "#request mod radial\n#include \"@smooth_parameters.glsl\"\n",
    );
    write(
        paths.default_dir(),
        "smooth_parameters.glsl",
        "#request setsmoothfactor 0.5\n",
    );
    write(paths.default_dir(), "radial/1.frag", "void main() {}\n");

    let loaded = load_settings(&RunConfig::default(), &paths).expect("load settings");
    assert_eq!(loaded.settings.module, "radial");
    assert_eq!(loaded.settings.smooth_factor, 0.5);
    assert_eq!(loaded.module_dir, paths.default_dir().join("radial"));
    assert_eq!(loaded.entry, paths.config_dir().join("rc.glsl"));
}

#[test]
fn user_module_shadows_default() {
    let (_temp, paths) = layout();
    write(paths.default_dir(), "rc.glsl", "#request mod bars\n");
    write(paths.default_dir(), "bars/1.frag", "");
    write(paths.config_dir(), "bars/1.frag", "");

    let loaded = load_settings(&RunConfig::default(), &paths).unwrap();
    assert_eq!(loaded.module_dir, paths.config_dir().join("bars"));
}

#[test]
fn entry_overrides_injected_requests() {
    let (_temp, paths) = layout();
    write(paths.config_dir(), "rc.glsl", "#request setframerate 24\n");
    write(paths.config_dir(), "bars/1.frag", "");

    let run = RunConfig::from_toml_str(
        "version = 1\nrequests = [\"setframerate 90\", \"setinterpolate false\"]\n",
    )
    .unwrap();
    let loaded = load_settings(&run, &paths).unwrap();
    assert_eq!(loaded.settings.frame_rate, 24);
    assert!(!loaded.settings.interpolate);
}

#[test]
fn injected_errors_name_the_synthetic_origin() {
    let (_temp, paths) = layout();
    write(paths.config_dir(), "rc.glsl", "");
    let run = RunConfig::from_toml_str("version = 1\nrequests = [\"setnothing 1\"]\n").unwrap();

    let err = load_settings(&run, &paths).unwrap_err();
    match err {
        SettingsError::Preprocess(PreprocessError::Parse { file, line, kind }) => {
            assert_eq!(file, Path::new("<requests>"));
            assert_eq!(line, 1);
            assert!(matches!(kind, ParseErrorKind::UnknownRequest(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn missing_entry_and_module_are_reported() {
    let (_temp, paths) = layout();
    let err = load_settings(&RunConfig::default(), &paths).unwrap_err();
    assert!(matches!(err, SettingsError::EntryNotFound { .. }));

    write(paths.config_dir(), "rc.glsl", "#request mod nowhere\n");
    let err = load_settings(&RunConfig::default(), &paths).unwrap_err();
    match err {
        SettingsError::ModuleNotFound { name, searched } => {
            assert_eq!(name, "nowhere");
            assert_eq!(searched.len(), 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
}
