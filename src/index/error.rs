//! Index strategy error types

use crate::codec::CodecError;
use thiserror::Error;

/// Errors raised while building or applying an index strategy
#[derive(Error, Debug)]
pub enum IndexError {
    /// Data or query has a different dimension count than the strategy
    #[error("Dimension mismatch: strategy {strategy} expects {expected} dimensions, got {actual}")]
    DimensionMismatch {
        strategy: String,
        expected: usize,
        actual: usize,
    },

    /// Strategy parameters are out of range
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),

    /// Persisted strategy or metadata could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
