//! Maps compiler logs back to the files the preprocessor read.
use std::fmt;
use std::path::PathBuf;

use preprocess::SourceMap;

/// One compiler message, located in an original source file when possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: {}", file.display(), line, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Finds the first `source:line` or `source(line)` pair in a log line and
/// returns it with the message text that follows.
pub fn parse_location(line: &str) -> Option<(usize, usize, &str)> {
    let bytes = line.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let boundary = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        if !(bytes[start].is_ascii_digit() && boundary) {
            start += 1;
            continue;
        }
        let file_end = digits_end(bytes, start);
        if let Some(&separator) = bytes.get(file_end) {
            let line_start = file_end + 1;
            let line_end = digits_end(bytes, line_start);
            let closed = match separator {
                b':' => Some(line_end),
                b'(' if bytes.get(line_end) == Some(&b')') => Some(line_end + 1),
                _ => None,
            };
            if let (true, Some(rest_start)) = (line_end > line_start, closed) {
                let file = line[start..file_end].parse().ok()?;
                let number = line[line_start..line_end].parse().ok()?;
                return Some((file, number, trim_message(&line[rest_start..])));
            }
        }
        start = file_end;
    }
    None
}

fn digits_end(bytes: &[u8], from: usize) -> usize {
    from + bytes
        .get(from..)
        .map_or(0, |tail| tail.iter().take_while(|b| b.is_ascii_digit()).count())
}

/// Drops separators and a `(column)` suffix left after the location.
fn trim_message(rest: &str) -> &str {
    let mut rest = rest.trim_start();
    if let Some(inner) = rest.strip_prefix('(') {
        if let Some(close) = inner.find(')') {
            if inner[..close].bytes().all(|b| b.is_ascii_digit()) {
                rest = &inner[close + 1..];
            }
        }
    }
    rest.trim_start_matches([':', ' '])
}

/// Splits a compiler log into diagnostics, resolving locations through `map`.
pub fn remap_log(log: &str, map: &SourceMap) -> Vec<Diagnostic> {
    log.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|raw| {
            let located = parse_location(raw).and_then(|(file, line, message)| {
                map.resolve_reported(file, line)
                    .map(|(path, line)| (path.to_path_buf(), line, message))
            });
            match located {
                Some((path, line, message)) => Diagnostic {
                    file: Some(path),
                    line: Some(line),
                    message: message.to_string(),
                },
                None => Diagnostic {
                    file: None,
                    line: None,
                    message: raw.trim().to_string(),
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_compiler_formats() {
        assert_eq!(
            parse_location("0:12(5): error: `x' undeclared"),
            Some((0, 12, "error: `x' undeclared"))
        );
        assert_eq!(
            parse_location("ERROR: 1:7: 'foo' : syntax error"),
            Some((1, 7, "'foo' : syntax error"))
        );
        assert_eq!(
            parse_location("2(30) : error C0000: syntax error"),
            Some((2, 30, "error C0000: syntax error"))
        );
        assert_eq!(parse_location("vec4 main: nothing here"), None);
        assert_eq!(parse_location("stage2:4: not a source index"), None);
    }

    #[test]
    fn unresolvable_lines_keep_raw_text() {
        let diagnostics = remap_log("\nlinker failed\n9:1: bad\n", &SourceMap::default());
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].to_string(), "linker failed");
        assert_eq!(diagnostics[1].file, None);
    }
}
