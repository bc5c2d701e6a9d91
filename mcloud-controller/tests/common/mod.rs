//! Test helpers for mcloud-controller integration tests.
//!
//! The fakes keep their state behind an `Arc<Mutex<_>>` so a test can hold
//! one clone while the reconciler owns another.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use mcloud_controller::clients::dns::{DnsApi, DnsOperation, ManagedZone, ZoneContext};
use mcloud_controller::clients::run::{
    IamPolicy, Operation, OperationError, RunApi, Service, ServiceName, invoker_policy,
};
use mcloud_controller::model::dns::{DnsSecSpec, DnsZoneSpec, NonExistence};
use mcloud_controller::model::run::{CloudRunSpec, ContainerSpec, Ingress};
use mcloud_controller::{
    ControllerConfig, MemoryStore, Object, ObjectKey, ObjectStore, RemoteError, StoreError,
    StoreEvent,
};

pub const NAMESERVERS: [&str; 2] = [
    "ns-cloud-a1.googledomains.com.",
    "ns-cloud-a2.googledomains.com.",
];

pub fn config() -> ControllerConfig {
    ControllerConfig::default()
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new("team", name)
}

pub fn run_spec(image: &str) -> CloudRunSpec {
    CloudRunSpec {
        project_id: "proj".to_string(),
        location: "europe-north1".to_string(),
        containers: vec![ContainerSpec {
            name: "app".to_string(),
            image: image.to_string(),
            port: 8080,
            liveness_probe: None,
            startup_probe: None,
        }],
        traffic: vec![],
        ingress: Ingress::All,
        invoke_members: vec!["allUsers".to_string()],
        cleanup_on_delete: true,
    }
}

pub fn dns_spec(dnssec: &str, cleanup_on_delete: bool) -> DnsZoneSpec {
    DnsZoneSpec {
        project_id: "proj".to_string(),
        dns_name: "team.example.com".to_string(),
        private_zone: false,
        dnssec: DnsSecSpec {
            state: dnssec.to_string(),
            non_existence: NonExistence::Nsec3,
        },
        cleanup_on_delete,
    }
}

fn take_failure(
    failures: &mut HashMap<&'static str, RemoteError>,
    method: &'static str,
) -> Result<(), RemoteError> {
    match failures.remove(method) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// =============================================================================
// Cloud Run
// =============================================================================

enum RunEffect {
    Put(String, Service),
    Remove(String),
}

#[derive(Default)]
struct RunState {
    services: HashMap<String, Service>,
    operations: HashMap<String, Operation>,
    effects: HashMap<String, RunEffect>,
    failures: HashMap<&'static str, RemoteError>,
    invokers: HashMap<String, IamPolicy>,
    calls: Vec<&'static str>,
    next_op: u64,
    next_revision: u64,
    auto_complete: bool,
}

impl RunState {
    fn apply(&mut self, effect: RunEffect) -> Option<Service> {
        match effect {
            RunEffect::Put(name, mut service) => {
                self.next_revision += 1;
                let id = name.rsplit('/').next().unwrap_or_default().to_string();
                service.name = name.clone();
                service.uri = format!("https://{}-xyz.a.run.app", id);
                service.latest_ready_revision = format!("{}-{:05}", id, self.next_revision);
                service.etag = format!("etag-{}", self.next_revision);
                self.services.insert(name, service.clone());
                Some(service)
            }
            RunEffect::Remove(name) => {
                self.services.remove(&name);
                None
            }
        }
    }

    fn start(&mut self, effect: RunEffect) -> Operation {
        self.next_op += 1;
        let name = format!("projects/proj/locations/europe-north1/operations/op-{}", self.next_op);
        let mut op = Operation {
            name: name.clone(),
            ..Default::default()
        };
        if self.auto_complete {
            op.done = true;
            op.response = self.apply(effect);
        } else {
            self.effects.insert(name.clone(), effect);
        }
        self.operations.insert(name, op.clone());
        op
    }

    fn finish(&mut self, error: Option<&str>) {
        let names: Vec<String> = self
            .operations
            .iter()
            .filter(|(_, op)| !op.done)
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            let effect = self.effects.remove(&name);
            let response = match (error, effect) {
                (None, Some(effect)) => self.apply(effect),
                _ => None,
            };
            if let Some(op) = self.operations.get_mut(&name) {
                op.done = true;
                op.response = response;
                op.error = error.map(|message| OperationError {
                    code: 9,
                    message: message.to_string(),
                });
            }
        }
    }
}

/// Scripted Cloud Run API.
#[derive(Clone, Default)]
pub struct FakeRunApi {
    state: Arc<Mutex<RunState>>,
}

impl FakeRunApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every operation as soon as it starts.
    pub fn auto_complete(self) -> Self {
        self.state.lock().unwrap().auto_complete = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change the remote service.
    pub fn mutating_calls(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(*c, "create_service" | "update_service" | "delete_service"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Make the next call of `method` fail with `err`.
    pub fn fail_next(&self, method: &'static str, err: RemoteError) {
        self.state.lock().unwrap().failures.insert(method, err);
    }

    pub fn complete_all(&self) {
        self.state.lock().unwrap().finish(None);
    }

    pub fn fail_all(&self, message: &str) {
        self.state.lock().unwrap().finish(Some(message));
    }

    /// Drop every operation, as if the provider expired them.
    pub fn forget_operations(&self) {
        let mut state = self.state.lock().unwrap();
        let names: Vec<String> = state.operations.keys().cloned().collect();
        for name in names {
            if let Some(effect) = state.effects.remove(&name) {
                state.apply(effect);
            }
        }
        state.operations.clear();
    }

    pub fn service(&self, id: &str) -> Option<Service> {
        let name = format!("projects/proj/locations/europe-north1/services/{}", id);
        self.state.lock().unwrap().services.get(&name).cloned()
    }

    /// Change the image behind the controller's back.
    pub fn set_image(&self, id: &str, image: &str) {
        let name = format!("projects/proj/locations/europe-north1/services/{}", id);
        if let Some(service) = self.state.lock().unwrap().services.get_mut(&name) {
            service.template.containers[0].image = image.to_string();
        }
    }

    pub fn invokers(&self, id: &str) -> Option<IamPolicy> {
        let name = format!("projects/proj/locations/europe-north1/services/{}", id);
        self.state.lock().unwrap().invokers.get(&name).cloned()
    }

    fn enter(
        &self,
        method: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, RunState>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method);
        take_failure(&mut state.failures, method)?;
        Ok(state)
    }
}

#[async_trait]
impl RunApi for FakeRunApi {
    async fn get_service(&self, name: &ServiceName) -> Result<Service, RemoteError> {
        let state = self.enter("get_service")?;
        state
            .services
            .get(&name.to_string())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))
    }

    async fn create_service(
        &self,
        name: &ServiceName,
        service: &Service,
    ) -> Result<Operation, RemoteError> {
        let mut state = self.enter("create_service")?;
        if state.services.contains_key(&name.to_string()) {
            return Err(RemoteError::AlreadyExists(name.to_string()));
        }
        Ok(state.start(RunEffect::Put(name.to_string(), service.clone())))
    }

    async fn update_service(
        &self,
        name: &ServiceName,
        service: &Service,
    ) -> Result<Operation, RemoteError> {
        let mut state = self.enter("update_service")?;
        if !state.services.contains_key(&name.to_string()) {
            return Err(RemoteError::NotFound(name.to_string()));
        }
        Ok(state.start(RunEffect::Put(name.to_string(), service.clone())))
    }

    async fn delete_service(&self, name: &ServiceName) -> Result<Operation, RemoteError> {
        let mut state = self.enter("delete_service")?;
        if !state.services.contains_key(&name.to_string()) {
            return Err(RemoteError::NotFound(name.to_string()));
        }
        Ok(state.start(RunEffect::Remove(name.to_string())))
    }

    async fn get_operation(&self, operation: &str) -> Result<Operation, RemoteError> {
        let state = self.enter("get_operation")?;
        state
            .operations
            .get(operation)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(operation.to_string()))
    }

    async fn set_invokers(
        &self,
        name: &ServiceName,
        members: &[String],
    ) -> Result<(), RemoteError> {
        let mut state = self.enter("set_invokers")?;
        state.invokers.insert(name.to_string(), invoker_policy(members));
        Ok(())
    }
}

// =============================================================================
// Cloud DNS
// =============================================================================

#[derive(Default)]
struct DnsState {
    zones: HashMap<String, ManagedZone>,
    operations: HashMap<String, DnsOperation>,
    patches: HashMap<String, ManagedZone>,
    failures: HashMap<&'static str, RemoteError>,
    calls: Vec<&'static str>,
    next_op: u64,
}

/// Scripted Cloud DNS API. Patches stay pending until completed.
#[derive(Clone, Default)]
pub struct FakeDnsApi {
    state: Arc<Mutex<DnsState>>,
}

impl FakeDnsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(*c, "create_zone" | "patch_zone" | "delete_zone"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn fail_next(&self, method: &'static str, err: RemoteError) {
        self.state.lock().unwrap().failures.insert(method, err);
    }

    pub fn zone(&self, name: &str) -> Option<ManagedZone> {
        self.state.lock().unwrap().zones.get(name).cloned()
    }

    /// Seed a zone as if someone created it out of band.
    pub fn insert_zone(&self, zone: ManagedZone) {
        self.state
            .lock()
            .unwrap()
            .zones
            .insert(zone.name.clone(), zone);
    }

    pub fn complete_all(&self) {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<String> = state.patches.keys().cloned().collect();
        for id in ids {
            let Some(zone) = state.patches.remove(&id) else {
                continue;
            };
            state.zones.insert(zone.name.clone(), zone.clone());
            if let Some(op) = state.operations.get_mut(&id) {
                op.status = "done".to_string();
                op.zone_context = Some(ZoneContext {
                    old_value: None,
                    new_value: Some(zone),
                });
            }
        }
    }

    pub fn forget_operations(&self) {
        let mut state = self.state.lock().unwrap();
        state.operations.clear();
    }

    fn enter(
        &self,
        method: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, DnsState>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method);
        take_failure(&mut state.failures, method)?;
        Ok(state)
    }
}

#[async_trait]
impl DnsApi for FakeDnsApi {
    async fn get_zone(&self, _project: &str, zone: &str) -> Result<ManagedZone, RemoteError> {
        let state = self.enter("get_zone")?;
        state
            .zones
            .get(zone)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(zone.to_string()))
    }

    async fn create_zone(
        &self,
        _project: &str,
        zone: &ManagedZone,
    ) -> Result<ManagedZone, RemoteError> {
        let mut state = self.enter("create_zone")?;
        if state.zones.contains_key(&zone.name) {
            return Err(RemoteError::AlreadyExists(zone.name.clone()));
        }
        let mut created = zone.clone();
        created.name_servers = NAMESERVERS.iter().map(|s| s.to_string()).collect();
        state.zones.insert(created.name.clone(), created.clone());
        Ok(created)
    }

    async fn patch_zone(
        &self,
        _project: &str,
        zone_name: &str,
        zone: &ManagedZone,
    ) -> Result<DnsOperation, RemoteError> {
        let mut state = self.enter("patch_zone")?;
        let Some(current) = state.zones.get(zone_name).cloned() else {
            return Err(RemoteError::NotFound(zone_name.to_string()));
        };
        let mut patched = zone.clone();
        patched.name_servers = current.name_servers;

        state.next_op += 1;
        let op = DnsOperation {
            id: state.next_op.to_string(),
            status: "pending".to_string(),
            zone_context: None,
        };
        state.patches.insert(op.id.clone(), patched);
        state.operations.insert(op.id.clone(), op.clone());
        Ok(op)
    }

    async fn delete_zone(&self, _project: &str, zone: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_zone")?;
        state
            .zones
            .remove(zone)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(zone.to_string()))
    }

    async fn get_operation(
        &self,
        _project: &str,
        _zone: &str,
        operation: &str,
    ) -> Result<DnsOperation, RemoteError> {
        let state = self.enter("get_operation")?;
        state
            .operations
            .get(operation)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(operation.to_string()))
    }
}

// =============================================================================
// Store
// =============================================================================

/// MemoryStore whose next status write loses a race with another writer.
pub struct RacingStore<S, T> {
    inner: MemoryStore<S, T>,
    race_next_status_write: Mutex<bool>,
}

impl<S, T> RacingStore<S, T> {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            race_next_status_write: Mutex::new(false),
        }
    }

    pub fn race_next_status_write(&self) {
        *self.race_next_status_write.lock().unwrap() = true;
    }
}

#[async_trait]
impl<S, T> ObjectStore<S, T> for RacingStore<S, T>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<Object<S, T>>, StoreError> {
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<Object<S, T>>, StoreError> {
        self.inner.list().await
    }

    async fn create(&self, key: ObjectKey, spec: S) -> Result<Object<S, T>, StoreError> {
        self.inner.create(key, spec).await
    }

    async fn update(&self, object: &Object<S, T>) -> Result<Object<S, T>, StoreError> {
        self.inner.update(object).await
    }

    async fn update_status(&self, object: &Object<S, T>) -> Result<Object<S, T>, StoreError> {
        let race = std::mem::take(&mut *self.race_next_status_write.lock().unwrap());
        if race {
            return Err(StoreError::VersionMismatch {
                expected: object.meta.resource_version,
                actual: object.meta.resource_version + 1,
            });
        }
        self.inner.update_status(object).await
    }

    async fn request_deletion(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.inner.request_deletion(key).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

/// Wait until `check` holds for the object under `key`, or panic.
pub async fn wait_for<St, S, T, F>(store: &St, key: &ObjectKey, check: F)
where
    St: ObjectStore<S, T> + ?Sized,
    S: Send + Sync,
    T: Send + Sync,
    F: Fn(Option<&Object<S, T>>) -> bool,
{
    for _ in 0..500 {
        let object = store.get(key).await.unwrap();
        if check(object.as_ref()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition on {} not reached in time", key);
}
