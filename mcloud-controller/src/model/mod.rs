//! Desired-state objects and their observed status.

pub mod dns;
pub mod run;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operations::OperationLog;

/// Composite identity of a desired-state object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name of the remote resource backing this object (`<namespace>-<name>`).
    pub fn remote_name(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-managed metadata of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: ObjectKey,
    /// Bumped by the store on every write.
    pub resource_version: u64,
    /// Set by the store once deletion is requested; never cleared.
    #[serde(default)]
    pub deletion_requested: bool,
    /// Deletion guard. While set, the store keeps the object around even
    /// after deletion was requested.
    #[serde(default)]
    pub guarded: bool,
}

/// A desired-state object: user intent plus system-written status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object<S, T> {
    pub meta: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: T,
}

impl<S, T: Default> Object<S, T> {
    /// A fresh object as the store creates it.
    pub fn new(key: ObjectKey, spec: S) -> Self {
        Self {
            meta: ObjectMeta {
                key,
                resource_version: 1,
                deletion_requested: false,
                guarded: false,
            },
            spec,
            status: T::default(),
        }
    }
}

impl<S, T> Object<S, T> {
    pub fn key(&self) -> &ObjectKey {
        &self.meta.key
    }
}

/// Behaviour every observed-status type shares with the reconciler.
pub trait ObservedStatus: Clone + Default + PartialEq + Send + Sync + 'static {
    fn operations(&self) -> &OperationLog;

    fn operations_mut(&mut self) -> &mut OperationLog;

    /// Record the reconciliation phase: `ready` once the remote matches the
    /// spec, `reconciling` while a detected change is in flight.
    fn set_progress(&mut self, ready: bool, reconciling: bool);
}
