use std::path::PathBuf;

use crate::color::LiteralError;
use crate::request::{ArgType, RequestError};

/// What went wrong while recognising a directive or inline syntax.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("malformed #{directive} directive: {reason}")]
    MalformedDirective {
        directive: &'static str,
        reason: String,
    },
    #[error("unknown request '{0}'")]
    UnknownRequest(String),
    #[error("request '{request}' takes {expected} argument(s), found {found}")]
    ArgumentCount {
        request: String,
        expected: usize,
        found: usize,
    },
    #[error("request '{request}' argument {position} must be a {expected}, found '{found}'")]
    ArgumentType {
        request: String,
        position: usize,
        expected: ArgType,
        found: String,
    },
    #[error("request '{request}' declares unknown signature code '{code}'")]
    Signature { request: String, code: char },
    #[error(transparent)]
    InvalidColor(#[from] LiteralError),
    #[error("unresolved bind '@{0}' has no default")]
    UnresolvedBind(String),
    #[error("unknown expansion control '{0}'")]
    UnknownExpansion(String),
    #[error("include of {} would recurse", .0.display())]
    IncludeCycle(PathBuf),
    #[error("includes nested deeper than {0} levels")]
    IncludeDepth(usize),
    #[error("no {0} directory configured for include '{1}'")]
    MissingRoot(&'static str, String),
}

/// Fatal preprocessing failure. Every variant aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("{}:{}: {}", .file.display(), .line, .kind)]
    Parse {
        file: PathBuf,
        line: usize,
        kind: ParseErrorKind,
    },
    #[error("{}:{}: request '{}' rejected: {}", .file.display(), .line, .request, .source)]
    Config {
        file: PathBuf,
        line: usize,
        request: String,
        #[source]
        source: RequestError,
    },
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PreprocessError {
    /// Origin of the failure when it maps to a specific source line.
    pub fn location(&self) -> Option<(&std::path::Path, usize)> {
        match self {
            PreprocessError::Parse { file, line, .. } | PreprocessError::Config { file, line, .. } => {
                Some((file.as_path(), *line))
            }
            PreprocessError::Io { .. } => None,
        }
    }
}
