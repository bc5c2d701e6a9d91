//! Error types for reconciliation and provider calls.

use thiserror::Error;

use crate::store::StoreError;

/// A failed call against a cloud provider, classified by the client.
///
/// Reconcilers dispatch on the variant only, never on transport details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The addressed resource or operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create raced with an existing resource of the same name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Network trouble, throttling or a server-side error. Safe to retry.
    #[error("transient: {0}")]
    Transient(String),

    /// Permission denied, malformed request and everything else that
    /// needs an operator.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, RemoteError::AlreadyExists(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteError::Terminal(_))
    }
}

/// Errors returned from a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A provider call failed.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// Reading or writing the desired-state store failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The declared spec cannot be turned into a provider request.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}

impl ReconcileError {
    /// Whether the scheduler should re-invoke with backoff.
    ///
    /// Terminal provider errors and invalid specs wait for the object to
    /// change instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Remote(e) => !e.is_terminal(),
            ReconcileError::Store(e) => e.is_retryable(),
            ReconcileError::InvalidSpec(_) => false,
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;
