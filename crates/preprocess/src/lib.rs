//! GLSL source preprocessor for Spectrashade stage programs.
//!
//! A single pass over each [`SourceUnit`] expands the directive surface the
//! stock GLSL preprocessor lacks and hands back compiler-ready text:
//!
//! ```text
//!   SourceUnit ──▶ Preprocessor::process ──▶ ProcessedSource { text, SourceMap }
//!                        │
//!                        ├─ #request  ──▶ RequestTable handler (mutates ctx)
//!                        ├─ #include  ──▶ nested unit, own #line numbering
//!                        ├─ #define   ──▶ #ifdef/#undef guard + define
//!                        ├─ #expand   ──▶ m(0); m(1); ... from ctx
//!                        └─ #RRGGBB / @name:default inline substitution
//! ```
//!
//! Every output line is attributable to a `(file, line)` pair through
//! `#line <line> <file-index>` markers, which the [`SourceMap`] mirrors for
//! error reporting after compilation.

mod color;
mod error;
mod machine;
mod request;
mod source;

pub use color::{decode_channels, Color, LiteralError, MAX_HEX_DIGITS};
pub use error::{ParseErrorKind, PreprocessError};
pub use machine::{
    define_guard, parse_directive, process, Directive, DirectiveContext, Preprocessor,
    MAX_INCLUDE_DEPTH,
};
pub use request::{Arg, ArgType, Invoke, Request, RequestError, RequestTable, Token};
pub use source::{LineOrigin, ProcessedSource, SourceMap, SourceUnit};
