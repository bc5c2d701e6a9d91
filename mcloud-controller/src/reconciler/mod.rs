//! Reconcilers for different resource kinds.
//!
//! One generic [`Reconciler`] drives every kind. What differs between kinds
//! is captured by [`RemoteProvider`]: how to fetch, create, update and
//! delete the remote resource, how to poll its operations, and how to tell
//! whether it matches the spec.

pub mod diff;
pub mod dns;
mod engine;
pub mod run;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::model::{Object, ObservedStatus};
use crate::operations::OperationRecord;

pub use diff::Compare;
pub use engine::Reconciler;

/// Outcome of a successful reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing left to do until the object changes.
    Done,
    /// Invoke again after the given delay.
    RequeueAfter(Duration),
}

/// A mutating call the provider accepted.
#[derive(Debug, Clone)]
pub struct OperationHandle<R> {
    /// Provider-assigned operation name, used for polling.
    pub name: String,
    /// The provider finished the call before answering.
    pub done: bool,
    /// Resource state carried by a finished call.
    pub result: Option<R>,
}

/// Answer to polling an operation.
#[derive(Debug, Clone)]
pub struct PollOutcome<R> {
    pub done: bool,
    pub result: Option<R>,
    /// Failure reported by a finished operation.
    pub error: Option<String>,
}

impl<R> PollOutcome<R> {
    pub fn pending() -> Self {
        Self {
            done: false,
            result: None,
            error: None,
        }
    }

    /// Finished without a result the reconciler can use.
    pub fn finished() -> Self {
        Self {
            done: true,
            result: None,
            error: None,
        }
    }
}

/// Desired-state object type handled by a provider.
pub type ObjectOf<P> = Object<<P as RemoteProvider>::Spec, <P as RemoteProvider>::Status>;

/// Capabilities the reconciler needs from one resource kind.
#[async_trait]
pub trait RemoteProvider: Send + Sync + 'static {
    type Spec: Clone + PartialEq + Send + Sync + 'static;
    type Status: ObservedStatus;
    /// Provider-side representation of the resource.
    type Remote: Send + Sync + 'static;

    /// Kind name for logs.
    fn kind(&self) -> &'static str;

    /// Reject specs that cannot be turned into provider requests.
    fn validate(&self, _spec: &Self::Spec) -> Result<(), String> {
        Ok(())
    }

    async fn fetch(&self, object: &ObjectOf<Self>) -> Result<Self::Remote, RemoteError>;

    async fn create(
        &self,
        object: &ObjectOf<Self>,
    ) -> Result<OperationHandle<Self::Remote>, RemoteError>;

    /// Replace `current` with the resource described by the spec.
    async fn update(
        &self,
        object: &ObjectOf<Self>,
        current: Self::Remote,
    ) -> Result<OperationHandle<Self::Remote>, RemoteError>;

    async fn delete(
        &self,
        object: &ObjectOf<Self>,
    ) -> Result<OperationHandle<Self::Remote>, RemoteError>;

    async fn poll(
        &self,
        object: &ObjectOf<Self>,
        record: &OperationRecord,
    ) -> Result<PollOutcome<Self::Remote>, RemoteError>;

    /// Names of the tracked fields where `remote` diverges from `spec`.
    /// Empty when in sync.
    fn diff(&self, spec: &Self::Spec, remote: &Self::Remote) -> Vec<&'static str>;

    /// Copy resolved remote identifiers into the status.
    fn observe(&self, status: &mut Self::Status, remote: &Self::Remote);

    /// Idempotent, untracked side effects applied while in sync.
    async fn converged(
        &self,
        _object: &ObjectOf<Self>,
        _remote: &Self::Remote,
    ) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Whether deleting the object deletes the remote resource.
    fn cleanup_on_delete(&self, _spec: &Self::Spec) -> bool {
        true
    }
}
