//! ObjectStore trait definition.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::error::Result;
use super::event::StoreEvent;
use crate::model::{Object, ObjectKey};

/// Store for desired-state objects of one kind.
///
/// Every write is guarded by the object's `resource_version`: a write based
/// on a stale read fails with [`StoreError::VersionMismatch`] and must be
/// retried from a fresh read.
///
/// [`StoreError::VersionMismatch`]: super::StoreError::VersionMismatch
#[async_trait]
pub trait ObjectStore<S, T>: Send + Sync
where
    S: Send + Sync,
    T: Send + Sync,
{
    /// Get an object by key.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Object<S, T>>>;

    /// List all objects.
    async fn list(&self) -> Result<Vec<Object<S, T>>>;

    /// Create a new object with empty status and no deletion guard.
    async fn create(&self, key: ObjectKey, spec: S) -> Result<Object<S, T>>;

    /// Overwrite spec and deletion guard of an object.
    ///
    /// Status and the deletion request are not touched. Removing the guard
    /// from an object whose deletion was requested erases it.
    async fn update(&self, object: &Object<S, T>) -> Result<Object<S, T>>;

    /// Overwrite only the observed status of an object.
    async fn update_status(&self, object: &Object<S, T>) -> Result<Object<S, T>>;

    /// Request deletion. Unguarded objects are erased right away.
    async fn request_deletion(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to store events.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
