//! The generic reconciliation state machine.
//!
//! Nothing is kept in memory between passes; every pass re-derives its state
//! from the stored object:
//!
//! 1. no deletion guard: attach it and come back immediately
//! 2. operations pending: poll them, come back shortly while any still run
//! 3. deletion requested: delete remotely, then remove the guard
//! 4. otherwise: create, update or just observe the remote resource
//!
//! At most one mutating provider call is issued per pass and never while an
//! operation is still pending.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{Disposition, ObjectOf, OperationHandle, PollOutcome, RemoteProvider};
use crate::config::ControllerConfig;
use crate::error::{ReconcileError, RemoteError, Result};
use crate::model::{ObjectKey, ObservedStatus};
use crate::operations::{OperationKind, OperationRecord};
use crate::store::{ObjectStore, StoreError};

/// Reconciler for one resource kind.
pub struct Reconciler<P: RemoteProvider> {
    provider: P,
    store: Arc<dyn ObjectStore<P::Spec, P::Status>>,
    config: ControllerConfig,
}

impl<P: RemoteProvider> Reconciler<P> {
    pub fn new(
        provider: P,
        store: Arc<dyn ObjectStore<P::Spec, P::Status>>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore<P::Spec, P::Status>> {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one reconciliation pass for the object stored under `key`.
    #[instrument(skip(self, key), fields(kind = self.provider.kind(), object = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Disposition> {
        let Some(object) = self.store.get(key).await? else {
            debug!("Object no longer exists");
            return Ok(Disposition::Done);
        };

        match self.reconcile_object(object).await {
            Err(ReconcileError::Store(e)) if e.is_version_mismatch() => {
                info!("Object changed during reconciliation ({}), starting over", e);
                Ok(Disposition::RequeueAfter(Duration::ZERO))
            }
            Err(ReconcileError::Store(StoreError::NotFound(_))) => {
                debug!("Object erased during reconciliation");
                Ok(Disposition::Done)
            }
            result => result,
        }
    }

    async fn reconcile_object(&self, mut object: ObjectOf<P>) -> Result<Disposition> {
        if !object.meta.guarded {
            if object.meta.deletion_requested {
                // The store erases unguarded objects on its own.
                return Ok(Disposition::Done);
            }
            object.meta.guarded = true;
            self.store.update(&object).await?;
            info!("Attached deletion guard");
            return Ok(Disposition::RequeueAfter(Duration::ZERO));
        }

        if object.status.operations().has_pending() {
            let mut status = object.status.clone();
            let still_running = self.drain_operations(&object, &mut status).await?;
            if still_running {
                status.set_progress(false, true);
            }
            // Poll results are durable before anything else in this pass can fail.
            if status != object.status {
                object.status = status;
                object = self.store.update_status(&object).await?;
            }
            if still_running {
                return Ok(Disposition::RequeueAfter(self.config.short_retry));
            }
        }

        let status = object.status.clone();
        if object.meta.deletion_requested {
            return self.finalize(object, status).await;
        }
        self.converge(object, status).await
    }

    /// Poll every pending operation and fold the answers into `status`.
    ///
    /// Returns true while any operation is still running.
    async fn drain_operations(&self, object: &ObjectOf<P>, status: &mut P::Status) -> Result<bool> {
        let pending: Vec<OperationRecord> = status.operations().pending().cloned().collect();
        let mut still_running = false;

        for record in &pending {
            let outcome = match self.call(self.provider.poll(object, record)).await {
                Ok(outcome) => outcome,
                Err(RemoteError::NotFound(msg)) => {
                    warn!(
                        "Operation {} is unknown to the provider ({}), treating it as finished",
                        record.name, msg
                    );
                    PollOutcome::finished()
                }
                Err(e) => return Err(e.into()),
            };

            if !outcome.done {
                debug!("Operation {} ({}) still running", record.name, record.kind);
                still_running = true;
                continue;
            }

            let log = match &outcome.error {
                Some(err) => {
                    warn!("Operation {} ({}) failed: {}", record.name, record.kind, err);
                    status.operations().fail(&record.name, err.clone())
                }
                None => {
                    info!("Operation {} ({}) completed", record.name, record.kind);
                    status.operations().resolve(&record.name, true)
                }
            };
            *status.operations_mut() = log;

            if let Some(remote) = &outcome.result {
                self.provider.observe(status, remote);
            }
        }

        Ok(still_running)
    }

    /// Deletion sub-protocol. The guard goes only after remote cleanup.
    async fn finalize(&self, object: ObjectOf<P>, status: P::Status) -> Result<Disposition> {
        if !self.provider.cleanup_on_delete(&object.spec) {
            info!("Remote cleanup disabled, leaving remote resource in place");
            return self.release(object).await;
        }

        let deleted = status
            .operations()
            .latest_of_kind(OperationKind::Delete)
            .is_some_and(|r| r.succeeded());
        if deleted {
            return self.release(object).await;
        }

        match self.call(self.provider.delete(&object)).await {
            Ok(handle) => {
                info!("Deleting remote resource, operation {}", handle.name);
                self.track(&object, status, OperationKind::Delete, handle)
                    .await
            }
            Err(RemoteError::NotFound(_)) => {
                info!("Remote resource already gone");
                self.release(object).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the deletion guard, letting the store erase the object.
    async fn release(&self, mut object: ObjectOf<P>) -> Result<Disposition> {
        object.meta.guarded = false;
        self.store.update(&object).await?;
        info!("Removed deletion guard");
        Ok(Disposition::Done)
    }

    async fn converge(&self, object: ObjectOf<P>, mut status: P::Status) -> Result<Disposition> {
        if let Err(reason) = self.provider.validate(&object.spec) {
            warn!("Rejecting spec: {}", reason);
            return Err(ReconcileError::InvalidSpec(reason));
        }

        let remote = match self.call(self.provider.fetch(&object)).await {
            Ok(remote) => remote,
            Err(RemoteError::NotFound(_)) => return self.create(object, status).await,
            Err(e) => return Err(e.into()),
        };

        let diverged = self.provider.diff(&object.spec, &remote);
        if !diverged.is_empty() {
            info!("Remote diverged from spec on {:?}, updating", diverged);
            let handle = self.call(self.provider.update(&object, remote)).await?;
            return self
                .track(&object, status, OperationKind::Update, handle)
                .await;
        }

        self.provider.observe(&mut status, &remote);
        self.call(self.provider.converged(&object, &remote)).await?;
        status.set_progress(true, false);
        if status != object.status {
            info!("Remote resource in sync");
            self.write_status(&object, status).await?;
        }
        Ok(Disposition::RequeueAfter(self.config.steady_interval))
    }

    async fn create(&self, object: ObjectOf<P>, status: P::Status) -> Result<Disposition> {
        match self.call(self.provider.create(&object)).await {
            Ok(handle) => {
                info!("Creating remote resource, operation {}", handle.name);
                self.track(&object, status, OperationKind::Create, handle)
                    .await
            }
            Err(RemoteError::AlreadyExists(msg)) => {
                info!("Remote resource already exists ({}), retrying shortly", msg);
                Ok(Disposition::RequeueAfter(self.config.short_retry))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record an accepted mutating call and persist it.
    async fn track(
        &self,
        object: &ObjectOf<P>,
        mut status: P::Status,
        kind: OperationKind,
        handle: OperationHandle<P::Remote>,
    ) -> Result<Disposition> {
        let operations = status.operations_mut();
        if handle.done {
            operations.record_completed(kind, handle.name.as_str());
        } else {
            operations.record(kind, handle.name.as_str());
        }
        if let Some(remote) = &handle.result {
            self.provider.observe(&mut status, remote);
        }
        status.set_progress(false, true);
        self.write_status(object, status).await?;

        if handle.done {
            Ok(Disposition::RequeueAfter(Duration::ZERO))
        } else {
            Ok(Disposition::RequeueAfter(self.config.short_retry))
        }
    }

    async fn write_status(&self, object: &ObjectOf<P>, status: P::Status) -> Result<()> {
        if status == object.status {
            return Ok(());
        }
        let mut updated = object.clone();
        updated.status = status;
        self.store.update_status(&updated).await?;
        Ok(())
    }

    /// Bound a provider call by the request timeout.
    async fn call<R>(
        &self,
        call: impl Future<Output = std::result::Result<R, RemoteError>>,
    ) -> std::result::Result<R, RemoteError> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(format!(
                "provider call timed out after {:?}",
                self.config.request_timeout
            ))),
        }
    }
}
