use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown object kind tag: {0:#04x}")]
    UnknownKind(u8),

    #[error("serialization error: {0}")]
    Serialization(String),
}
