use std::fs;
use std::path::Path;

use preprocess::{
    ParseErrorKind, PreprocessError, Preprocessor, ProcessedSource, RequestTable, SourceUnit,
};

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, contents).expect("write source");
}

fn run(unit: SourceUnit) -> Result<ProcessedSource, PreprocessError> {
    let requests = RequestTable::<()>::new();
    Preprocessor::new(&requests).process(unit, &mut ())
}

fn run_with_depth(unit: SourceUnit, depth: usize) -> Result<ProcessedSource, PreprocessError> {
    let requests = RequestTable::<()>::new();
    Preprocessor::new(&requests)
        .with_max_depth(depth)
        .process(unit, &mut ())
}

#[test]
fn config_relative_include_is_inlined_with_markers() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = temp.path();
    write(
        cfg,
        "1.frag",
        "#include \":util/common.glsl\"\nvoid main() {\n    vec4 c = @fg:#FFFFFF;\n}\n",
    );
    write(cfg, "util/common.glsl", "float helper() { return 1.0; }\n");

    let unit = SourceUnit::from_file(cfg.join("1.frag"))
        .unwrap()
        .with_config_dir(cfg);
    let output = run(unit).expect("process");

    assert_eq!(
        output.text(),
        "#line 1 0\n#line 1 1\nfloat helper() { return 1.0; }\n#line 2 0\nvoid main() {\n    vec4 c = vec4(1.000000, 1.000000, 1.000000, 1.000000);\n}\n"
    );
    let map = output.source_map();
    assert_eq!(map.files().len(), 2);
    assert_eq!(map.file(1), Some(cfg.join("util/common.glsl").as_path()));
    assert_eq!(map.resolve(3), Some((cfg.join("util/common.glsl").as_path(), 1)));
    assert_eq!(map.resolve(6), Some((cfg.join("1.frag").as_path(), 3)));
    assert_eq!(
        map.resolve_reported(0, 3),
        Some((cfg.join("1.frag").as_path(), 3))
    );
}

#[test]
fn default_and_relative_roots_resolve() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = temp.path().join("config");
    let defaults = temp.path().join("share");
    write(&cfg, "rc.glsl", "#include <@lib/base.glsl>\n");
    write(&defaults, "lib/base.glsl", "#include \"inner.glsl\"\nfloat base;\n");
    write(&defaults, "lib/inner.glsl", "float inner;\n");

    let unit = SourceUnit::from_file(cfg.join("rc.glsl"))
        .unwrap()
        .with_config_dir(&cfg)
        .with_default_dir(&defaults);
    let output = run(unit).expect("process");

    assert!(output.text().contains("#line 1 2\nfloat inner;\n#line 2 1\nfloat base;\n"));
    assert_eq!(output.source_map().file(2), Some(defaults.join("lib/inner.glsl").as_path()));
}

#[test]
fn processing_is_deterministic() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "a.glsl", "#include \"b.glsl\"\n#define X #102030\n");
    write(temp.path(), "b.glsl", "float b;\n");

    let first = run(SourceUnit::from_file(temp.path().join("a.glsl")).unwrap()).unwrap();
    let second = run(SourceUnit::from_file(temp.path().join("a.glsl")).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn include_cycles_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "a.glsl", "#include \"b.glsl\"\n");
    write(temp.path(), "b.glsl", "float b;\n#include \"a.glsl\"\n");

    let err = run(SourceUnit::from_file(temp.path().join("a.glsl")).unwrap()).unwrap_err();
    match err {
        PreprocessError::Parse { file, line, kind } => {
            assert_eq!(file, temp.path().join("b.glsl"));
            assert_eq!(line, 2);
            assert!(matches!(kind, ParseErrorKind::IncludeCycle(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }

    write(temp.path(), "self.glsl", "#include \"self.glsl\"\n");
    let err = run(SourceUnit::from_file(temp.path().join("self.glsl")).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        PreprocessError::Parse {
            kind: ParseErrorKind::IncludeCycle(_),
            ..
        }
    ));
}

#[test]
fn include_depth_is_capped() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "a.glsl", "#include \"b.glsl\"\n");
    write(temp.path(), "b.glsl", "#include \"c.glsl\"\n");
    write(temp.path(), "c.glsl", "#include \"d.glsl\"\n");
    write(temp.path(), "d.glsl", "float d;\n");

    let shallow = SourceUnit::from_file(temp.path().join("b.glsl")).unwrap();
    assert!(run_with_depth(shallow, 2).is_ok());

    let deep = SourceUnit::from_file(temp.path().join("a.glsl")).unwrap();
    let err = run_with_depth(deep, 2).unwrap_err();
    assert!(matches!(
        err,
        PreprocessError::Parse {
            kind: ParseErrorKind::IncludeDepth(2),
            ..
        }
    ));
}

#[test]
fn missing_include_is_an_io_error() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "a.glsl", "#include \"nope.glsl\"\n");

    let err = run(SourceUnit::from_file(temp.path().join("a.glsl")).unwrap()).unwrap_err();
    match err {
        PreprocessError::Io { path, .. } => assert_eq!(path, temp.path().join("nope.glsl")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn rooted_include_without_root_fails() {
    let err = run(SourceUnit::from_text("rc.glsl", "#include \":util.glsl\"\n")).unwrap_err();
    assert!(matches!(
        err,
        PreprocessError::Parse {
            kind: ParseErrorKind::MissingRoot("config", _),
            line: 1,
            ..
        }
    ));
}
