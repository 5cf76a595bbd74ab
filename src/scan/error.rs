//! Scan layer error types

use crate::codec::CodecError;
use crate::index::IndexError;
use thiserror::Error;

/// Errors raised while writing to or scanning the key-value store
#[derive(Error, Debug)]
pub enum ScanError {
    /// Underlying store failed
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Index strategy rejected the data
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// A single range scan failed
    #[error("Scan of range {range} failed: {reason}")]
    RangeFailed { range: String, reason: String },

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// A scan task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias for scan operations
pub type ScanResult<T> = Result<T, ScanError>;
