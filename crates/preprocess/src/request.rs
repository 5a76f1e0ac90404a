//! `#request` handler table.
//!
//! Handlers are plain function pointers paired with a name and a type
//! signature string (`i` integer, `f` float, `s` string, `b` boolean). Any
//! mutable state a handler needs travels through the context argument, so a
//! table can be built once and reused for every file it is applied to.
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a single request argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Float,
    Str,
    Bool,
}

impl ArgType {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'i' => Some(Self::Int),
            'f' => Some(Self::Float),
            's' => Some(Self::Str),
            'b' => Some(Self::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgType::Int => "integer",
            ArgType::Float => "float",
            ArgType::Str => "string",
            ArgType::Bool => "boolean",
        })
    }
}

/// A request argument after coercion against the handler signature.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Arg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Arg::Float(value) => Some(*value),
            Arg::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

/// Raw argument token as it appeared on the directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub quoted: bool,
}

impl Token {
    /// Converts the token into the requested type, or `None` on mismatch.
    ///
    /// Quoted tokens only ever satisfy string arguments.
    pub fn coerce(&self, ty: ArgType) -> Option<Arg> {
        if self.quoted {
            return match ty {
                ArgType::Str => Some(Arg::Str(self.text.clone())),
                _ => None,
            };
        }
        match ty {
            ArgType::Int => self.text.parse::<i64>().ok().map(Arg::Int),
            ArgType::Float => self
                .text
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Arg::Float),
            ArgType::Str => Some(Arg::Str(self.text.clone())),
            ArgType::Bool => match self.text.as_str() {
                "true" => Some(Arg::Bool(true)),
                "false" => Some(Arg::Bool(false)),
                _ => None,
            },
        }
    }
}

/// Failure reported by a handler body; surfaces as a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    message: String,
}

impl RequestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Invoke<C> = fn(&[Arg], &mut C) -> Result<(), RequestError>;

/// One named `#request` handler.
pub struct Request<C> {
    pub name: &'static str,
    pub signature: &'static str,
    pub invoke: Invoke<C>,
}

impl<C> Request<C> {
    pub const fn new(name: &'static str, signature: &'static str, invoke: Invoke<C>) -> Self {
        Self {
            name,
            signature,
            invoke,
        }
    }

    pub fn arg_types(&self) -> impl Iterator<Item = Option<ArgType>> + '_ {
        self.signature.chars().map(ArgType::from_code)
    }
}

impl<C> Clone for Request<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Request<C> {}

impl<C> fmt::Debug for Request<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Coercion failure, positioned for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CoerceError {
    Count { expected: usize, found: usize },
    Type { index: usize, expected: ArgType, found: String },
    Signature(char),
}

/// Name-indexed collection of handlers.
pub struct RequestTable<C> {
    entries: BTreeMap<&'static str, Request<C>>,
}

impl<C> RequestTable<C> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Adds a handler, replacing any previous handler with the same name.
    pub fn register(&mut self, request: Request<C>) -> &mut Self {
        if self.entries.insert(request.name, request).is_some() {
            tracing::debug!(name = request.name, "replaced request handler");
        }
        self
    }

    pub fn with(mut self, request: Request<C>) -> Self {
        self.register(request);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Request<C>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for RequestTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> FromIterator<Request<C>> for RequestTable<C> {
    fn from_iter<I: IntoIterator<Item = Request<C>>>(iter: I) -> Self {
        let mut table = Self::new();
        for request in iter {
            table.register(request);
        }
        table
    }
}

pub(crate) fn coerce_args<C>(
    request: &Request<C>,
    tokens: &[Token],
) -> Result<Vec<Arg>, CoerceError> {
    let expected = request.signature.chars().count();
    if expected != tokens.len() {
        return Err(CoerceError::Count {
            expected,
            found: tokens.len(),
        });
    }
    let mut args = Vec::with_capacity(tokens.len());
    for (index, (code, token)) in request.signature.chars().zip(tokens).enumerate() {
        let ty = ArgType::from_code(code).ok_or(CoerceError::Signature(code))?;
        let arg = token.coerce(ty).ok_or_else(|| CoerceError::Type {
            index,
            expected: ty,
            found: token.text.clone(),
        })?;
        args.push(arg);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(text: &str) -> Token {
        Token {
            text: text.to_string(),
            quoted: false,
        }
    }

    fn quoted(text: &str) -> Token {
        Token {
            text: text.to_string(),
            quoted: true,
        }
    }

    fn noop(_: &[Arg], _: &mut ()) -> Result<(), RequestError> {
        Ok(())
    }

    #[test]
    fn coerces_each_signature_code() {
        let request = Request::new("mixed", "ifsb", noop);
        let args = coerce_args(
            &request,
            &[bare("12"), bare("0.5"), quoted("audio_l"), bare("true")],
        )
        .unwrap();
        assert_eq!(
            args,
            vec![
                Arg::Int(12),
                Arg::Float(0.5),
                Arg::Str("audio_l".into()),
                Arg::Bool(true)
            ]
        );
    }

    #[test]
    fn integers_satisfy_float_arguments() {
        let request = Request::new("setgravitystep", "f", noop);
        let args = coerce_args(&request, &[bare("4")]).unwrap();
        assert_eq!(args[0].as_float(), Some(4.0));
    }

    #[test]
    fn quoted_numbers_do_not_coerce() {
        let request = Request::new("setframerate", "i", noop);
        let err = coerce_args(&request, &[quoted("60")]).unwrap_err();
        assert!(matches!(
            err,
            CoerceError::Type {
                index: 0,
                expected: ArgType::Int,
                ..
            }
        ));
    }

    #[test]
    fn argument_count_is_checked() {
        let request = Request::new("uniform", "ss", noop);
        let err = coerce_args(&request, &[bare("audio_l")]).unwrap_err();
        assert_eq!(
            err,
            CoerceError::Count {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn table_replaces_duplicates() {
        let table: RequestTable<()> = [Request::new("a", "", noop), Request::new("a", "i", noop)]
            .into_iter()
            .collect();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a").map(|r| r.signature), Some("i"));
    }
}
