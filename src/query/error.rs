//! Query error types

use crate::index::IndexError;
use thiserror::Error;

/// Errors raised while planning a query against an index
#[derive(Error, Debug)]
pub enum QueryError {
    /// The index declares dimensions the constraints do not cover
    #[error("Index {index} not supported for this query, missing dimensions: {}", .missing.join(", "))]
    IndexNotSupported { index: String, missing: Vec<String> },

    /// A constraint could not be built from its inputs
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// Index strategy failed during decomposition
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::IndexNotSupported {
            index: "SFC".to_string(),
            missing: vec!["time".to_string(), "latitude".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Index SFC not supported for this query, missing dimensions: time, latitude"
        );
    }
}
