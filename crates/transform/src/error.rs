use crate::chain::TransformKind;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),
    #[error("buffer length {0} is not a power of two of at least 2")]
    NotPowerOfTwo(usize),
    #[error("{kind} state was sized for {expected} samples, got {found}")]
    BufferLength {
        kind: TransformKind,
        expected: usize,
        found: usize,
    },
    #[error("invalid transform parameter: {0}")]
    Parameter(String),
    #[error("binding {binding} step {step} already holds {found} state")]
    StateMismatch {
        binding: u32,
        step: usize,
        found: TransformKind,
    },
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}
