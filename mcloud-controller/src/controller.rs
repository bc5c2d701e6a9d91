//! Control loop driving one [`Reconciler`].
//!
//! The loop keeps a due time per object key. Store events make a key due
//! immediately; after each pass the key is rescheduled from the returned
//! disposition. Keys are processed one at a time, so a single key never has
//! two passes in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::model::ObjectKey;
use crate::reconciler::{Disposition, Reconciler, RemoteProvider};
use crate::store::StoreEvent;

/// Due times and consecutive failure counts per key.
#[derive(Debug, Default)]
pub struct DueQueue {
    due: HashMap<ObjectKey, Instant>,
    failures: HashMap<ObjectKey, u32>,
}

impl DueQueue {
    /// Make `key` due no later than `now`.
    pub fn wake(&mut self, key: ObjectKey, now: Instant) {
        self.due
            .entry(key)
            .and_modify(|at| *at = (*at).min(now))
            .or_insert(now);
    }

    /// Replace the due time of `key`.
    pub fn schedule(&mut self, key: ObjectKey, at: Instant) {
        self.due.insert(key, at);
    }

    pub fn forget(&mut self, key: &ObjectKey) {
        self.due.remove(key);
        self.failures.remove(key);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.due.values().min().copied()
    }

    /// Remove and return the earliest key due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<ObjectKey> {
        let key = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)))
            .map(|(key, _)| key.clone())?;
        self.due.remove(&key);
        Some(key)
    }

    /// Count another consecutive failure for `key`.
    pub fn record_failure(&mut self, key: &ObjectKey) -> u32 {
        let count = self.failures.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear_failures(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn is_scheduled(&self, key: &ObjectKey) -> bool {
        self.due.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

/// Runs a reconciler against every object of its store.
pub struct Controller<P: RemoteProvider> {
    reconciler: Arc<Reconciler<P>>,
    queue: DueQueue,
}

impl<P: RemoteProvider> Controller<P> {
    pub fn new(reconciler: Reconciler<P>) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue: DueQueue::default(),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<P>> {
        &self.reconciler
    }

    /// Run until `shutdown` turns true or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let kind = self.reconciler.provider().kind();
        let mut events = self.reconciler.store().subscribe();
        info!("Starting {} controller", kind);
        self.resync().await;

        loop {
            let next = self.queue.next_due();
            let deadline = next.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stopping {} controller", kind);
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("{} controller missed {} store events, resyncing", kind, missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Store closed, stopping {} controller", kind);
                        break;
                    }
                },
                _ = sleep_until(deadline), if next.is_some() => {
                    if let Some(key) = self.queue.pop_due(Instant::now()) {
                        self.process(key).await;
                    }
                }
            }
        }
    }

    fn on_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Deleted { key, .. } => {
                debug!("{} erased, no longer tracked", key);
                self.queue.forget(&key);
            }
            event if event.triggers_reconcile() => {
                self.queue.wake(event.key().clone(), Instant::now());
            }
            _ => {}
        }
    }

    /// Make every stored object due now.
    async fn resync(&mut self) {
        match self.reconciler.store().list().await {
            Ok(objects) => {
                let now = Instant::now();
                for object in objects {
                    self.queue.wake(object.meta.key, now);
                }
            }
            Err(e) => error!("Failed to list objects: {}", e),
        }
    }

    async fn process(&mut self, key: ObjectKey) {
        let result = self.reconciler.reconcile(&key).await;
        let now = Instant::now();
        match result {
            Ok(Disposition::Done) => {
                self.queue.clear_failures(&key);
            }
            Ok(Disposition::RequeueAfter(delay)) => {
                self.queue.clear_failures(&key);
                self.queue.schedule(key, now + delay);
            }
            Err(e) if e.is_retryable() => {
                let failures = self.queue.record_failure(&key);
                let delay = self.reconciler.config().backoff(failures);
                warn!(
                    "Reconciliation of {} failed ({} in a row), retrying in {:?}: {}",
                    key, failures, delay, e
                );
                self.queue.schedule(key, now + delay);
            }
            Err(e) => {
                self.queue.clear_failures(&key);
                error!(
                    "Reconciliation of {} failed permanently, waiting for a change: {}",
                    key, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[test]
    fn test_wake_never_postpones() {
        let now = Instant::now();
        let mut queue = DueQueue::default();
        queue.schedule(key("a"), now + Duration::from_secs(60));
        queue.wake(key("a"), now);
        assert_eq!(queue.next_due(), Some(now));

        queue.wake(key("a"), now + Duration::from_secs(5));
        assert_eq!(queue.next_due(), Some(now));
    }

    #[test]
    fn test_pop_due_earliest_first() {
        let now = Instant::now();
        let mut queue = DueQueue::default();
        queue.schedule(key("late"), now + Duration::from_secs(10));
        queue.schedule(key("b"), now);
        queue.schedule(key("a"), now);

        assert_eq!(queue.pop_due(now), Some(key("a")));
        assert_eq!(queue.pop_due(now), Some(key("b")));
        assert_eq!(queue.pop_due(now), None);
        assert!(queue.is_scheduled(&key("late")));
        assert_eq!(
            queue.pop_due(now + Duration::from_secs(10)),
            Some(key("late"))
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failures_count_until_cleared() {
        let mut queue = DueQueue::default();
        assert_eq!(queue.record_failure(&key("a")), 1);
        assert_eq!(queue.record_failure(&key("a")), 2);
        queue.clear_failures(&key("a"));
        assert_eq!(queue.record_failure(&key("a")), 1);

        queue.schedule(key("a"), Instant::now());
        queue.forget(&key("a"));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.record_failure(&key("a")), 1);
    }
}
