//! Desired-state store.
//!
//! The store owns desired-state objects. Reconcilers read spec and
//! deletion state from it and write observed status back with
//! optimistic concurrency on `resource_version`.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::StoreEvent;
pub use memory::MemoryStore;
pub use traits::ObjectStore;
