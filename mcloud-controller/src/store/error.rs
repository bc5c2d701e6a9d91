//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An object with the same key already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },
}

impl StoreError {
    /// A concurrent writer won the race; re-read and try again.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, StoreError::VersionMismatch { .. })
    }

    pub fn is_retryable(&self) -> bool {
        self.is_version_mismatch()
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
