//! In-memory ObjectStore.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::error::{Result, StoreError};
use super::event::StoreEvent;
use super::traits::ObjectStore;
use crate::model::{Object, ObjectKey};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// ObjectStore keeping all objects of one kind in memory.
pub struct MemoryStore<S, T> {
    objects: RwLock<HashMap<ObjectKey, Object<S, T>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl<S, T> Default for MemoryStore<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, T> MemoryStore<S, T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn check_version<S, T>(current: &Object<S, T>, incoming: &Object<S, T>) -> Result<()> {
    if current.meta.resource_version != incoming.meta.resource_version {
        return Err(StoreError::VersionMismatch {
            expected: incoming.meta.resource_version,
            actual: current.meta.resource_version,
        });
    }
    Ok(())
}

#[async_trait]
impl<S, T> ObjectStore<S, T> for MemoryStore<S, T>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<Object<S, T>>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<Object<S, T>>> {
        let objects = self.objects.read().await;
        let mut list: Vec<_> = objects.values().cloned().collect();
        list.sort_by(|a, b| a.meta.key.cmp(&b.meta.key));
        Ok(list)
    }

    async fn create(&self, key: ObjectKey, spec: S) -> Result<Object<S, T>> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{} already exists", key)));
        }
        let object = Object::new(key.clone(), spec);
        objects.insert(key.clone(), object.clone());
        drop(objects);

        debug!("Created {}", key);
        self.emit(StoreEvent::Created { key, at: Utc::now() });
        Ok(object)
    }

    async fn update(&self, object: &Object<S, T>) -> Result<Object<S, T>> {
        let key = object.meta.key.clone();
        let mut objects = self.objects.write().await;
        let current = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(current, object)?;

        let spec_changed = current.spec != object.spec;
        let guard_changed = current.meta.guarded != object.meta.guarded;
        current.spec = object.spec.clone();
        current.meta.guarded = object.meta.guarded;
        current.meta.resource_version += 1;
        let updated = current.clone();

        let erase = updated.meta.deletion_requested && !updated.meta.guarded;
        if erase {
            objects.remove(&key);
        }
        drop(objects);

        let at = Utc::now();
        if spec_changed {
            self.emit(StoreEvent::SpecUpdated {
                key: key.clone(),
                at,
            });
        }
        if guard_changed {
            self.emit(StoreEvent::GuardChanged {
                key: key.clone(),
                guarded: updated.meta.guarded,
                at,
            });
        }
        if erase {
            debug!("Erased {} after deletion guard was removed", key);
            self.emit(StoreEvent::Deleted { key, at });
        }
        Ok(updated)
    }

    async fn update_status(&self, object: &Object<S, T>) -> Result<Object<S, T>> {
        let key = object.meta.key.clone();
        let mut objects = self.objects.write().await;
        let current = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(current, object)?;

        current.status = object.status.clone();
        current.meta.resource_version += 1;
        let updated = current.clone();
        drop(objects);

        self.emit(StoreEvent::StatusUpdated { key, at: Utc::now() });
        Ok(updated)
    }

    async fn request_deletion(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let current = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if current.meta.deletion_requested {
            return Ok(());
        }

        let at = Utc::now();
        if current.meta.guarded {
            current.meta.deletion_requested = true;
            current.meta.resource_version += 1;
            drop(objects);
            self.emit(StoreEvent::DeletionRequested {
                key: key.clone(),
                at,
            });
        } else {
            objects.remove(key);
            drop(objects);
            self.emit(StoreEvent::Deleted {
                key: key.clone(),
                at,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
