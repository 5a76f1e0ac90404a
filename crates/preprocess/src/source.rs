use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PreprocessError;

/// One top-level file or `#include` target awaiting processing.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    text: String,
    origin: PathBuf,
    current_dir: PathBuf,
    config_dir: Option<PathBuf>,
    default_dir: Option<PathBuf>,
}

impl SourceUnit {
    /// Wraps in-memory text; relative includes resolve against the origin's
    /// parent directory.
    pub fn from_text(origin: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let origin = origin.into();
        let current_dir = parent_dir(&origin);
        Self {
            text: text.into(),
            origin,
            current_dir,
            config_dir: None,
            default_dir: None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PreprocessError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| PreprocessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(path, text))
    }

    /// Directory `:`-prefixed includes resolve against.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Directory `@`-prefixed includes resolve against.
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = dir.into();
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn default_dir(&self) -> Option<&Path> {
        self.default_dir.as_deref()
    }

    /// Builds the unit for an include target, inheriting the lookup roots.
    pub(crate) fn nested(&self, path: PathBuf, text: String) -> Self {
        let current_dir = parent_dir(&path);
        Self {
            text,
            origin: path,
            current_dir,
            config_dir: self.config_dir.clone(),
            default_dir: self.default_dir.clone(),
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Marks the output line at which `file:line` numbering (re)starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOrigin {
    /// 1-based output line the marker applies to (the line after `#line`).
    pub output_line: usize,
    /// Index into [`SourceMap::files`].
    pub file: usize,
    /// 1-based line in the originating file.
    pub line: usize,
}

/// Remap table from output lines back to originating files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    files: Vec<PathBuf>,
    markers: Vec<LineOrigin>,
}

impl SourceMap {
    /// Files in inclusion order; the index is the `#line` source number.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&Path> {
        self.files.get(index).map(PathBuf::as_path)
    }

    pub fn markers(&self) -> &[LineOrigin] {
        &self.markers
    }

    /// Resolves a raw output line to its origin.
    pub fn resolve(&self, output_line: usize) -> Option<(&Path, usize)> {
        let index = self
            .markers
            .partition_point(|marker| marker.output_line <= output_line);
        let marker = self.markers.get(index.checked_sub(1)?)?;
        let path = self.file(marker.file)?;
        Some((path, marker.line + (output_line - marker.output_line)))
    }

    /// Resolves a `source:line` pair as reported by a compiler that honoured
    /// the emitted `#line` markers.
    pub fn resolve_reported(&self, file: usize, line: usize) -> Option<(&Path, usize)> {
        self.file(file).map(|path| (path, line))
    }

    pub(crate) fn push_file(&mut self, path: PathBuf) -> usize {
        self.files.push(path);
        self.files.len() - 1
    }

    pub(crate) fn push_marker(&mut self, marker: LineOrigin) {
        self.markers.push(marker);
    }

    fn shift(&mut self, lines: usize) {
        for marker in &mut self.markers {
            marker.output_line += lines;
        }
    }
}

/// Compiler-ready text plus its source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSource {
    text: String,
    map: SourceMap,
}

impl ProcessedSource {
    pub(crate) fn new(text: String, map: SourceMap) -> Self {
        Self { text, map }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.map
    }

    pub fn into_parts(self) -> (String, SourceMap) {
        (self.text, self.map)
    }

    /// Prepends generated text (e.g. a stage header), shifting the map so raw
    /// output lines keep resolving correctly.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        let mut text = String::with_capacity(prefix.len() + self.text.len() + 1);
        text.push_str(prefix);
        if !prefix.ends_with('\n') {
            text.push('\n');
        }
        let lines = text.bytes().filter(|byte| *byte == b'\n').count();
        text.push_str(&self.text);
        self.map.shift(lines);
        self.text = text;
        self
    }
}
