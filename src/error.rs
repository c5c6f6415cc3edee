//! Error types for evalq
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in evalq
#[derive(Debug, Error)]
pub enum EvalqError {
    /// No submission with this result id
    #[error("Result not found: {0}")]
    ResultNotFound(String),

    /// The result id is already queued, in flight, or awaiting a requeue
    #[error("Task already queued: {0}")]
    DuplicateTask(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for evalq operations
pub type Result<T> = std::result::Result<T, EvalqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_not_found_error() {
        let err = EvalqError::ResultNotFound("r-001".to_string());
        assert_eq!(err.to_string(), "Result not found: r-001");
    }

    #[test]
    fn test_duplicate_task_error() {
        let err = EvalqError::DuplicateTask("r-002".to_string());
        assert_eq!(err.to_string(), "Task already queued: r-002");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = EvalqError::InvalidState("result is not failed".to_string());
        assert_eq!(err.to_string(), "Invalid state: result is not failed");
    }

    #[test]
    fn test_storage_error() {
        let err = EvalqError::Storage("database locked".to_string());
        assert_eq!(err.to_string(), "Storage error: database locked");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EvalqError = io_err.into();
        assert!(matches!(err, EvalqError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: EvalqError = json_err.into();
        assert!(matches!(err, EvalqError::Json(_)));
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: EvalqError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, EvalqError::Sqlite(_)));
    }
}
