//! Error types for key/value store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during key/value store operations
#[derive(Debug)]
pub enum StoreError {
    /// Could not reach the store; retryable.
    Connection(String),

    /// The store rejected the operation.
    OperationFailed(String),

    /// Stored value could not be serialized/deserialized.
    Serialization(String),

    /// I/O error (file access, etc.)
    Io(std::io::Error),
}

impl StoreError {
    /// Connection-class errors are worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "failed to reach key/value store: {}", msg),
            StoreError::OperationFailed(msg) => write!(f, "store operation failed: {}", msg),
            StoreError::Serialization(msg) => write!(f, "store value serialization error: {}", msg),
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
