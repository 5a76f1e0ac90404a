use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::color::{self, Color, LiteralError, MAX_HEX_DIGITS};
use crate::error::{ParseErrorKind, PreprocessError};
use crate::request::{coerce_args, CoerceError, RequestTable, Token};
use crate::source::{LineOrigin, ProcessedSource, SourceMap, SourceUnit};

/// Include nesting limit; deeper chains are reported as a parse error.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Caller state consulted while scanning bodies.
///
/// The same value is handed mutably to every `#request` handler, so settings
/// changed by an earlier request are visible to later `#expand` and `@bind`
/// lookups in the same run.
pub trait DirectiveContext {
    /// Number of template instances `#expand <macro> <control>` emits.
    fn expansion_count(&self, control: &str) -> Option<usize>;

    /// Replacement for `@name`, when `name` is externally bound.
    fn bound_name(&self, name: &str) -> Option<String>;
}

impl DirectiveContext for () {
    fn expansion_count(&self, _control: &str) -> Option<usize> {
        None
    }

    fn bound_name(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Directive recognised at the start of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Request { name: String, args: Vec<Token> },
    Include(String),
    Define(String),
    Expand { name: String, control: String },
}

/// How a line's body is scanned for inline syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Ordinary text: colors and binds are substituted.
    Body,
    /// A `#define` line: like `Body`, but the leading `#` is the directive.
    DefineLine,
    /// Unrecognised directive: copied as-is, only comments are tracked.
    Verbatim,
}

#[derive(Clone, Copy)]
struct Location<'a> {
    file: &'a Path,
    line: usize,
}

impl Location<'_> {
    fn parse(self, kind: ParseErrorKind) -> PreprocessError {
        PreprocessError::Parse {
            file: self.file.to_path_buf(),
            line: self.line,
            kind,
        }
    }
}

struct Output {
    text: String,
    map: SourceMap,
    /// 1-based number of the output line currently being written.
    line: usize,
}

impl Output {
    fn new() -> Self {
        Self {
            text: String::new(),
            map: SourceMap::default(),
            line: 1,
        }
    }

    fn push(&mut self, text: &str) {
        self.line += text.bytes().filter(|byte| *byte == b'\n').count();
        self.text.push_str(text);
    }

    fn marker(&mut self, file: usize, line: usize) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.push("\n");
        }
        self.push(&format!("#line {line} {file}\n"));
        self.map.push_marker(LineOrigin {
            output_line: self.line,
            file,
            line,
        });
    }

    fn finish(self) -> ProcessedSource {
        ProcessedSource::new(self.text, self.map)
    }
}

/// Line-oriented state machine expanding the directive surface.
pub struct Preprocessor<'t, C> {
    requests: &'t RequestTable<C>,
    max_depth: usize,
}

impl<'t, C: DirectiveContext> Preprocessor<'t, C> {
    pub fn new(requests: &'t RequestTable<C>) -> Self {
        Self {
            requests,
            max_depth: MAX_INCLUDE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Processes a unit and everything it includes.
    ///
    /// Any failure aborts the whole run; no partial output is returned.
    pub fn process(
        &self,
        unit: SourceUnit,
        ctx: &mut C,
    ) -> Result<ProcessedSource, PreprocessError> {
        let mut out = Output::new();
        let mut stack = vec![canonical(unit.origin())];
        self.process_unit(&unit, ctx, &mut out, &mut stack)?;
        debug!(
            origin = %unit.origin().display(),
            bytes = out.text.len(),
            files = out.map.files().len(),
            "preprocessed source"
        );
        Ok(out.finish())
    }

    fn process_unit(
        &self,
        unit: &SourceUnit,
        ctx: &mut C,
        out: &mut Output,
        stack: &mut Vec<PathBuf>,
    ) -> Result<(), PreprocessError> {
        let file = out.map.push_file(unit.origin().to_path_buf());
        out.marker(file, 1);

        let mut in_comment = false;
        let mut continued = false;
        let mut pending_marker = false;

        for (index, raw) in unit.text().split_inclusive('\n').enumerate() {
            let here = Location {
                file: unit.origin(),
                line: index + 1,
            };
            let at_line_start = !continued && !in_comment;
            continued = raw.trim_end_matches(['\n', '\r']).ends_with('\\');

            let is_directive = at_line_start && raw.trim_start().starts_with('#');
            let directive = if is_directive {
                parse_directive(raw).map_err(|kind| here.parse(kind))?
            } else {
                None
            };
            // Consumed lines produce no text, so the marker waits for the next
            // line that does.
            let consumed = matches!(
                directive,
                Some(Directive::Include(_) | Directive::Request { .. })
            );
            if pending_marker && at_line_start && !consumed {
                out.marker(file, here.line);
                pending_marker = false;
            }

            match directive {
                Some(Directive::Include(target)) => {
                    self.include(unit, &target, ctx, out, stack, here)?;
                    pending_marker = true;
                }
                Some(Directive::Request { name, args }) => {
                    self.request(&name, &args, ctx, here)?;
                    pending_marker = true;
                }
                Some(Directive::Define(name)) => {
                    out.push(&define_guard(&name));
                    out.marker(file, here.line);
                    let text = self.scan(raw, Mode::DefineLine, &mut in_comment, ctx, here)?;
                    out.push(&text);
                    pending_marker = true;
                }
                Some(Directive::Expand { name, control }) => {
                    let count = ctx
                        .expansion_count(&control)
                        .ok_or_else(|| here.parse(ParseErrorKind::UnknownExpansion(control)))?;
                    let mut text = (0..count)
                        .map(|index| format!("{name}({index});"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    text.push('\n');
                    out.push(&text);
                    pending_marker = true;
                }
                None => {
                    let mode = if is_directive { Mode::Verbatim } else { Mode::Body };
                    let text = self.scan(raw, mode, &mut in_comment, ctx, here)?;
                    out.push(&text);
                }
            }
        }
        Ok(())
    }

    fn include(
        &self,
        unit: &SourceUnit,
        target: &str,
        ctx: &mut C,
        out: &mut Output,
        stack: &mut Vec<PathBuf>,
        here: Location<'_>,
    ) -> Result<(), PreprocessError> {
        let path = resolve_include(unit, target).map_err(|kind| here.parse(kind))?;
        if stack.len() > self.max_depth {
            return Err(here.parse(ParseErrorKind::IncludeDepth(self.max_depth)));
        }
        let key = canonical(&path);
        if stack.contains(&key) {
            return Err(here.parse(ParseErrorKind::IncludeCycle(path)));
        }
        let text = fs::read_to_string(&path).map_err(|source| PreprocessError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(
            from = %here.file.display(),
            line = here.line,
            path = %path.display(),
            "including source"
        );

        let nested = unit.nested(path, text);
        stack.push(key);
        let result = self.process_unit(&nested, ctx, out, stack);
        stack.pop();
        result
    }

    fn request(
        &self,
        name: &str,
        tokens: &[Token],
        ctx: &mut C,
        here: Location<'_>,
    ) -> Result<(), PreprocessError> {
        let request = self
            .requests
            .get(name)
            .ok_or_else(|| here.parse(ParseErrorKind::UnknownRequest(name.to_string())))?;
        let args = coerce_args(request, tokens).map_err(|err| {
            here.parse(match err {
                CoerceError::Count { expected, found } => ParseErrorKind::ArgumentCount {
                    request: name.to_string(),
                    expected,
                    found,
                },
                CoerceError::Type {
                    index,
                    expected,
                    found,
                } => ParseErrorKind::ArgumentType {
                    request: name.to_string(),
                    position: index + 1,
                    expected,
                    found,
                },
                CoerceError::Signature(code) => ParseErrorKind::Signature {
                    request: name.to_string(),
                    code,
                },
            })
        })?;
        debug!(request = name, ?args, "dispatching request");
        (request.invoke)(&args, ctx).map_err(|source| PreprocessError::Config {
            file: here.file.to_path_buf(),
            line: here.line,
            request: name.to_string(),
            source,
        })
    }

    /// Copies one line, substituting colors and binds outside comments.
    fn scan(
        &self,
        raw: &str,
        mode: Mode,
        in_comment: &mut bool,
        ctx: &C,
        here: Location<'_>,
    ) -> Result<String, PreprocessError> {
        let bytes = raw.as_bytes();
        let substitute = mode != Mode::Verbatim;
        let lead = match mode {
            Mode::DefineLine => bytes.iter().position(|byte| !byte.is_ascii_whitespace()),
            _ => None,
        };
        let mut out = String::with_capacity(raw.len());
        let mut copied = 0;
        let mut in_string = false;
        let mut i = 0;

        while i < bytes.len() {
            let byte = bytes[i];
            if *in_comment {
                if byte == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    *in_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            if in_string {
                match byte {
                    b'\\' => i += 2,
                    b'"' => {
                        in_string = false;
                        i += 1;
                    }
                    _ => i += 1,
                }
                continue;
            }
            match byte {
                b'/' if bytes.get(i + 1) == Some(&b'/') => break,
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    *in_comment = true;
                    i += 2;
                }
                b'"' => {
                    in_string = true;
                    i += 1;
                }
                b'#' if substitute && Some(i) != lead => {
                    if bytes.get(i + 1) == Some(&b'#') {
                        // token pasting inside a macro body
                        i += 2;
                        continue;
                    }
                    match scan_color(raw, i).map_err(|kind| here.parse(kind))? {
                        Some((literal, end)) => {
                            out.push_str(&raw[copied..i]);
                            out.push_str(&literal);
                            copied = end;
                            i = end;
                        }
                        None => i += 1,
                    }
                }
                b'@' if substitute => match self.scan_bind(raw, i, ctx, here)? {
                    Some((text, end)) => {
                        out.push_str(&raw[copied..i]);
                        out.push_str(&text);
                        copied = end;
                        i = end;
                    }
                    None => i += 1,
                },
                _ => i += 1,
            }
        }
        out.push_str(&raw[copied..]);
        Ok(out)
    }

    fn scan_bind(
        &self,
        raw: &str,
        at: usize,
        ctx: &C,
        here: Location<'_>,
    ) -> Result<Option<(String, usize)>, PreprocessError> {
        let bytes = raw.as_bytes();
        let start = at + 1;
        if !matches!(bytes.get(start), Some(byte) if byte.is_ascii_alphabetic() || *byte == b'_') {
            return Ok(None);
        }
        let mut end = start;
        while end < bytes.len() && is_ident_byte(bytes[end]) {
            end += 1;
        }
        let name = &raw[start..end];

        let mut consumed = end;
        let mut default = None;
        if bytes.get(end) == Some(&b':') {
            let expr_end = default_extent(bytes, end + 1);
            if expr_end > end + 1 {
                default = Some(&raw[end + 1..expr_end]);
                consumed = expr_end;
            }
        }

        if let Some(bound) = ctx.bound_name(name) {
            return Ok(Some((bound, consumed)));
        }
        match default {
            Some(expr) => {
                let mut in_comment = false;
                let text = self.scan(expr, Mode::Body, &mut in_comment, ctx, here)?;
                Ok(Some((text, consumed)))
            }
            None => Err(here.parse(ParseErrorKind::UnresolvedBind(name.to_string()))),
        }
    }
}

/// Convenience wrapper for one-shot processing.
pub fn process<C: DirectiveContext>(
    unit: SourceUnit,
    requests: &RequestTable<C>,
    ctx: &mut C,
) -> Result<ProcessedSource, PreprocessError> {
    Preprocessor::new(requests).process(unit, ctx)
}

/// The guard emitted ahead of every `#define`.
pub fn define_guard(name: &str) -> String {
    format!("#ifdef {name}\n#undef {name}\n#endif\n")
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn malformed(directive: &'static str, reason: impl Into<String>) -> ParseErrorKind {
    ParseErrorKind::MalformedDirective {
        directive,
        reason: reason.into(),
    }
}

/// Recognises the keyword after a leading `#`; `None` means pass-through.
pub fn parse_directive(raw: &str) -> Result<Option<Directive>, ParseErrorKind> {
    let body = raw.trim_start();
    let body = body.strip_prefix('#').unwrap_or(body).trim_start();
    let keyword_len = body.bytes().take_while(|byte| is_ident_byte(*byte)).count();
    let (keyword, rest) = body.split_at(keyword_len);

    match keyword {
        "include" => parse_include_target(rest).map(|target| Some(Directive::Include(target))),
        "request" => {
            let mut tokens = tokenize("request", rest)?.into_iter();
            let name = tokens
                .next()
                .ok_or_else(|| malformed("request", "missing request name"))?;
            Ok(Some(Directive::Request {
                name: name.text,
                args: tokens.collect(),
            }))
        }
        "define" => {
            let rest = rest.trim_start();
            let name_len = rest.bytes().take_while(|byte| is_ident_byte(*byte)).count();
            if name_len == 0 {
                return Err(malformed("define", "missing macro name"));
            }
            Ok(Some(Directive::Define(rest[..name_len].to_string())))
        }
        "expand" => {
            let tokens = tokenize("expand", rest)?;
            match <[Token; 2]>::try_from(tokens) {
                Ok([name, control]) => Ok(Some(Directive::Expand {
                    name: name.text,
                    control: control.text,
                })),
                Err(_) => Err(malformed("expand", "expected <macro> <control>")),
            }
        }
        _ => Ok(None),
    }
}

fn parse_include_target(rest: &str) -> Result<String, ParseErrorKind> {
    let trimmed = rest.trim_start();
    if let Some(inner) = trimmed.strip_prefix('<') {
        let close = inner
            .find('>')
            .ok_or_else(|| malformed("include", "missing closing '>'"))?;
        let target = inner[..close].trim();
        if target.is_empty() {
            return Err(malformed("include", "empty path"));
        }
        return Ok(target.to_string());
    }
    let tokens = tokenize("include", rest)?;
    match <[Token; 1]>::try_from(tokens) {
        Ok([target]) if !target.text.is_empty() => Ok(target.text),
        _ => Err(malformed("include", "expected exactly one path")),
    }
}

fn resolve_include(unit: &SourceUnit, target: &str) -> Result<PathBuf, ParseErrorKind> {
    if let Some(rest) = target.strip_prefix(':') {
        let root = unit
            .config_dir()
            .ok_or_else(|| ParseErrorKind::MissingRoot("config", target.to_string()))?;
        return Ok(root.join(rest));
    }
    if let Some(rest) = target.strip_prefix('@') {
        let root = unit
            .default_dir()
            .ok_or_else(|| ParseErrorKind::MissingRoot("default", target.to_string()))?;
        return Ok(root.join(rest));
    }
    let path = Path::new(target);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(unit.current_dir().join(path))
    }
}

/// Splits directive arguments on whitespace, honouring double quotes and
/// stopping at a line comment.
fn tokenize(directive: &'static str, input: &str) -> Result<Vec<Token>, ParseErrorKind> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            byte if byte.is_ascii_whitespace() => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => break,
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = input[i + 2..]
                    .find("*/")
                    .ok_or_else(|| malformed(directive, "comment must close on the directive line"))?;
                i += 2 + close + 2;
            }
            b'"' => {
                let mut text = String::new();
                let mut end = None;
                let mut chars = input[i + 1..].char_indices();
                while let Some((offset, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        '"' => {
                            end = Some(i + 1 + offset + 1);
                            break;
                        }
                        '\n' | '\r' => break,
                        _ => text.push(ch),
                    }
                }
                i = end.ok_or_else(|| malformed(directive, "unterminated string"))?;
                tokens.push(Token { text, quoted: true });
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !(bytes[i] == b'/' && matches!(bytes.get(i + 1), Some(b'/' | b'*')))
                {
                    i += 1;
                }
                tokens.push(Token {
                    text: input[start..i].to_string(),
                    quoted: false,
                });
            }
        }
    }
    Ok(tokens)
}

/// Parses a color literal starting at the `#` at `at`.
///
/// Returns `None` when the `#` is not followed by hex digits or identifier
/// characters, leaving it in the output untouched.
fn scan_color(raw: &str, at: usize) -> Result<Option<(String, usize)>, ParseErrorKind> {
    let bytes = raw.as_bytes();
    let start = at + 1;
    let mut end = start;
    while end < bytes.len() && end - start < MAX_HEX_DIGITS && color::is_hex_digit(bytes[end]) {
        end += 1;
    }
    let next = bytes.get(end).copied();
    if end == start {
        return match next {
            Some(byte) if is_ident_byte(byte) => {
                Err(LiteralError::InvalidDigit(byte as char).into())
            }
            _ => Ok(None),
        };
    }
    if let Some(byte) = next {
        if is_ident_byte(byte) {
            let err = if color::is_hex_digit(byte) {
                LiteralError::Length(end - start + 1)
            } else {
                LiteralError::InvalidDigit(byte as char)
            };
            return Err(err.into());
        }
    }
    let color = Color::from_hex(&raw[start..end])?;
    Ok(Some((color.to_glsl(), end)))
}

/// End of a bind default: the first top-level whitespace, `;`, `,` or
/// unmatched closing bracket.
fn default_extent(bytes: &[u8], from: usize) -> usize {
    let mut depth = 0usize;
    let mut end = from;
    while end < bytes.len() {
        match bytes[end] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            b'\n' | b'\r' => break,
            b';' | b',' if depth == 0 => break,
            byte if byte.is_ascii_whitespace() && depth == 0 => break,
            _ => {}
        }
        end += 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::request::{Arg, Request, RequestError};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(String, Vec<Arg>)>,
        binds: HashMap<String, String>,
        controls: HashMap<String, usize>,
    }

    impl DirectiveContext for Recorder {
        fn expansion_count(&self, control: &str) -> Option<usize> {
            self.controls.get(control).copied()
        }

        fn bound_name(&self, name: &str) -> Option<String> {
            self.binds.get(name).cloned()
        }
    }

    fn record_uniform(args: &[Arg], ctx: &mut Recorder) -> Result<(), RequestError> {
        ctx.calls.push(("uniform".into(), args.to_vec()));
        Ok(())
    }

    fn record_fps(args: &[Arg], ctx: &mut Recorder) -> Result<(), RequestError> {
        let fps = args[0].as_int().unwrap_or_default();
        if fps <= 0 {
            return Err(RequestError::new("frame rate must be positive"));
        }
        ctx.calls.push(("setframerate".into(), args.to_vec()));
        Ok(())
    }

    fn table() -> RequestTable<Recorder> {
        RequestTable::new()
            .with(Request::new("uniform", "ss", record_uniform))
            .with(Request::new("setframerate", "i", record_fps))
    }

    fn run(text: &str, ctx: &mut Recorder) -> Result<ProcessedSource, PreprocessError> {
        let requests = table();
        process(SourceUnit::from_text("1.frag", text), &requests, ctx)
    }

    #[test]
    fn plain_text_gains_one_marker() {
        let input = "uniform float x;\nvoid main() {\n    gl_FragColor = vec4(x);\n}\n";
        let output = run(input, &mut Recorder::default()).unwrap();
        assert_eq!(output.text(), format!("#line 1 0\n{input}"));
        assert_eq!(output.len(), output.text().len());
        assert_eq!(output.source_map().files(), &[PathBuf::from("1.frag")]);
    }

    #[test]
    fn define_is_guarded_each_time() {
        let output = run("#define FOO\n#define FOO\n", &mut Recorder::default()).unwrap();
        let guard = "#ifdef FOO\n#undef FOO\n#endif\n";
        assert_eq!(output.text().matches(guard).count(), 2);
        assert!(output
            .text()
            .starts_with(&format!("#line 1 0\n{guard}#line 1 0\n#define FOO\n")));
    }

    #[test]
    fn define_lines_map_back_to_their_source_line() {
        let output = run("#define FOO 1\nfloat x;\n", &mut Recorder::default()).unwrap();
        let lines: Vec<&str> = output.text().lines().collect();
        let define = lines.iter().position(|line| *line == "#define FOO 1").unwrap() + 1;
        let body = lines.iter().position(|line| *line == "float x;").unwrap() + 1;
        let map = output.source_map();
        assert_eq!(map.resolve(define), Some((Path::new("1.frag"), 1)));
        assert_eq!(map.resolve(body), Some((Path::new("1.frag"), 2)));
    }

    #[test]
    fn define_bodies_substitute_colors() {
        let output = run("#define COLOR (#3366b2 * 0.5)\n", &mut Recorder::default()).unwrap();
        assert!(output
            .text()
            .contains("#define COLOR (vec4(0.200000, 0.400000, 0.698039, 1.000000) * 0.5)"));
    }

    #[test]
    fn function_like_define_uses_macro_name() {
        let output = run("#define SQ(x) ((x) * (x))\n", &mut Recorder::default()).unwrap();
        assert!(output.text().contains("#ifdef SQ\n#undef SQ\n#endif\n#line 1 0\n#define SQ(x)"));
    }

    #[test]
    fn colors_decode_mid_line() {
        let output = run(
            "vec4 a = #FF0000FF;\nvec4 b = #00ff00;\n",
            &mut Recorder::default(),
        )
        .unwrap();
        assert!(output
            .text()
            .contains("vec4 a = vec4(1.000000, 0.000000, 0.000000, 1.000000);"));
        assert!(output
            .text()
            .contains("vec4 b = vec4(0.000000, 1.000000, 0.000000, 1.000000);"));
    }

    #[test]
    fn invalid_color_reports_location() {
        let err = run("void main() {\n  vec4 c = #12345G;\n}\n", &mut Recorder::default())
            .unwrap_err();
        match err {
            PreprocessError::Parse { file, line, kind } => {
                assert_eq!(file, PathBuf::from("1.frag"));
                assert_eq!(line, 2);
                assert_eq!(
                    kind,
                    ParseErrorKind::InvalidColor(LiteralError::InvalidDigit('G'))
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(run("vec4 c = #FFF;\n", &mut Recorder::default()).is_err());
        assert!(run("vec4 c = #FF00FF00F;\n", &mut Recorder::default()).is_err());
    }

    #[test]
    fn comments_suppress_inline_syntax() {
        let input = "// #FFFFFF @missing\n/* #request nope\n#GGGGGG */ float x;\n";
        let output = run(input, &mut Recorder::default()).unwrap();
        assert_eq!(output.text(), format!("#line 1 0\n{input}"));
    }

    #[test]
    fn requests_dispatch_in_order() {
        let mut ctx = Recorder::default();
        let output = run(
            "#request setframerate 60\n#request uniform \"audio_l\" audio_l // left\nvoid main() {}\n",
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.calls.len(), 2);
        assert_eq!(ctx.calls[0].1, vec![Arg::Int(60)]);
        assert_eq!(
            ctx.calls[1].1,
            vec![Arg::Str("audio_l".into()), Arg::Str("audio_l".into())]
        );
        assert_eq!(
            output.text(),
            "#line 1 0\n#line 3 0\nvoid main() {}\n"
        );
        assert_eq!(
            output.source_map().resolve(3),
            Some((Path::new("1.frag"), 3))
        );
    }

    #[test]
    fn request_errors_are_fatal() {
        let unknown = run("#request nosuch 1\n", &mut Recorder::default()).unwrap_err();
        assert!(matches!(
            unknown,
            PreprocessError::Parse {
                kind: ParseErrorKind::UnknownRequest(_),
                ..
            }
        ));

        let mismatch = run("#request setframerate fast\n", &mut Recorder::default()).unwrap_err();
        assert!(matches!(
            mismatch,
            PreprocessError::Parse {
                kind: ParseErrorKind::ArgumentType { position: 1, .. },
                ..
            }
        ));

        let rejected = run("\n#request setframerate 0\n", &mut Recorder::default()).unwrap_err();
        match rejected {
            PreprocessError::Config { line, request, .. } => {
                assert_eq!(line, 2);
                assert_eq!(request, "setframerate");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn binds_substitute_or_fall_back() {
        let mut ctx = Recorder::default();
        ctx.binds.insert("fg".into(), "_IN_fg".into());
        let output = run(
            "vec4 a = @fg:#000000;\nvec4 b = @bg:#FFFFFF;\nvec4 c = mix(@bg:vec4(0.0, 1.0, 0.0, 1.0), a, 0.5);\n",
            &mut ctx,
        )
        .unwrap();
        assert!(output.text().contains("vec4 a = _IN_fg;"));
        assert!(output
            .text()
            .contains("vec4 b = vec4(1.000000, 1.000000, 1.000000, 1.000000);"));
        assert!(output
            .text()
            .contains("vec4 c = mix(vec4(0.0, 1.0, 0.0, 1.0), a, 0.5);"));
    }

    #[test]
    fn unresolved_bind_without_default_fails() {
        let err = run("float x = @gain;\n", &mut Recorder::default()).unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::Parse {
                kind: ParseErrorKind::UnresolvedBind(ref name),
                ..
            } if name == "gain"
        ));
    }

    #[test]
    fn expand_emits_indexed_calls() {
        let mut ctx = Recorder::default();
        ctx.controls.insert("_AVG_FRAMES".into(), 3);
        let output = run("#expand sample _AVG_FRAMES\nfloat y;\n", &mut ctx).unwrap();
        assert_eq!(
            output.text(),
            "#line 1 0\nsample(0); sample(1); sample(2);\n#line 2 0\nfloat y;\n"
        );

        let err = run("#expand sample _NOPE\n", &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::Parse {
                kind: ParseErrorKind::UnknownExpansion(_),
                ..
            }
        ));
    }

    #[test]
    fn other_directives_pass_through_verbatim() {
        let input = "#version 330\n#if 1 // #FFFFFF\n#endif\n";
        let output = run(input, &mut Recorder::default()).unwrap();
        assert_eq!(output.text(), format!("#line 1 0\n{input}"));
    }

    #[test]
    fn token_pasting_is_left_alone() {
        let output = run("#define CAT(a, b) a ## b\n", &mut Recorder::default()).unwrap();
        assert!(output.text().contains("#define CAT(a, b) a ## b\n"));
    }

    #[test]
    fn parses_directive_variants() {
        assert_eq!(
            parse_directive("#include \":util/smooth.glsl\"").unwrap(),
            Some(Directive::Include(":util/smooth.glsl".into()))
        );
        assert_eq!(
            parse_directive("  #  include <common.glsl>").unwrap(),
            Some(Directive::Include("common.glsl".into()))
        );
        assert_eq!(
            parse_directive("#expand m _CHANNELS").unwrap(),
            Some(Directive::Expand {
                name: "m".into(),
                control: "_CHANNELS".into()
            })
        );
        assert_eq!(parse_directive("#ifdef X").unwrap(), None);
        assert!(parse_directive("#request").is_err());
        assert!(parse_directive("#include").is_err());
        assert!(parse_directive("#request x \"open").is_err());
    }
}
