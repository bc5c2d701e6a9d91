//! mcloud-controller: drives declared cloud resources to their desired state.
//!
//! Desired-state objects live in an [`ObjectStore`]. For every resource kind
//! a [`Reconciler`] compares the declared spec with what the provider reports,
//! issues at most one mutating call per pass, tracks the provider's
//! long-running operations in the object's status and guards deletion until
//! the remote resource has been cleaned up.
//!
//! Supported kinds:
//! - Cloud DNS managed zones ([`reconciler::dns`])
//! - Cloud Run services ([`reconciler::run`])

pub mod clients;
pub mod config;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod model;
pub mod operations;
pub mod reconciler;
pub mod store;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{ReconcileError, RemoteError};
pub use model::{Object, ObjectKey, ObjectMeta, ObservedStatus};
pub use operations::{OperationKind, OperationLog, OperationRecord};
pub use reconciler::{Disposition, Reconciler, RemoteProvider};
pub use store::{MemoryStore, ObjectStore, StoreError, StoreEvent};
