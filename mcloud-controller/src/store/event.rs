//! Events emitted by store writes.

use chrono::{DateTime, Utc};

use crate::model::ObjectKey;

/// Events emitted when stored objects change.
///
/// These are dispatched via a broadcast channel to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new object was created.
    Created { key: ObjectKey, at: DateTime<Utc> },
    /// The spec of an object changed.
    SpecUpdated { key: ObjectKey, at: DateTime<Utc> },
    /// The deletion guard was attached or removed.
    GuardChanged {
        key: ObjectKey,
        guarded: bool,
        at: DateTime<Utc>,
    },
    /// Deletion was requested while the guard is attached.
    DeletionRequested { key: ObjectKey, at: DateTime<Utc> },
    /// Observed status was written.
    StatusUpdated { key: ObjectKey, at: DateTime<Utc> },
    /// The object was erased from the store.
    Deleted { key: ObjectKey, at: DateTime<Utc> },
}

impl StoreEvent {
    /// Get the key of the affected object.
    pub fn key(&self) -> &ObjectKey {
        match self {
            StoreEvent::Created { key, .. }
            | StoreEvent::SpecUpdated { key, .. }
            | StoreEvent::GuardChanged { key, .. }
            | StoreEvent::DeletionRequested { key, .. }
            | StoreEvent::StatusUpdated { key, .. }
            | StoreEvent::Deleted { key, .. } => key,
        }
    }

    /// Whether a controller should schedule a reconciliation pass.
    ///
    /// Status writes come from the reconciler itself and erased objects
    /// have nothing left to reconcile.
    pub fn triggers_reconcile(&self) -> bool {
        !matches!(
            self,
            StoreEvent::StatusUpdated { .. } | StoreEvent::Deleted { .. }
        )
    }
}
