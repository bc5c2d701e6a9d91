//! Reconciliation passes for Cloud DNS managed zones against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeDnsApi, NAMESERVERS, config, dns_spec, key};
use mcloud_controller::clients::dns::{DnsSecConfig, ManagedZone};
use mcloud_controller::model::dns::{DnsZoneSpec, DnsZoneStatus};
use mcloud_controller::reconciler::dns::{DnsDiffPolicy, DnsZoneProvider};
use mcloud_controller::reconciler::Compare;
use mcloud_controller::{
    Disposition, MemoryStore, ObjectKey, ObjectStore, OperationKind, Reconciler, RemoteError,
};

const SHORT: Disposition = Disposition::RequeueAfter(Duration::from_secs(1));
const STEADY: Disposition = Disposition::RequeueAfter(Duration::from_secs(60));
const NOW: Disposition = Disposition::RequeueAfter(Duration::ZERO);

struct Harness {
    api: FakeDnsApi,
    store: Arc<dyn ObjectStore<DnsZoneSpec, DnsZoneStatus>>,
    reconciler: Reconciler<DnsZoneProvider<FakeDnsApi>>,
}

impl Harness {
    fn with_policy(policy: DnsDiffPolicy) -> Self {
        let api = FakeDnsApi::new();
        let store: Arc<dyn ObjectStore<DnsZoneSpec, DnsZoneStatus>> =
            Arc::new(MemoryStore::<DnsZoneSpec, DnsZoneStatus>::new());
        let reconciler = Reconciler::new(
            DnsZoneProvider::new(api.clone(), policy),
            store.clone(),
            config(),
        );
        Self {
            api,
            store,
            reconciler,
        }
    }

    fn new() -> Self {
        Self::with_policy(DnsDiffPolicy::default())
    }

    async fn pass(&self, key: &ObjectKey) -> Disposition {
        self.reconciler.reconcile(key).await.unwrap()
    }

    async fn status(&self, key: &ObjectKey) -> DnsZoneStatus {
        self.store.get(key).await.unwrap().unwrap().status
    }

    async fn converged(&self, spec: DnsZoneSpec) -> ObjectKey {
        let key = key("zone");
        self.store.create(key.clone(), spec).await.unwrap();
        assert_eq!(self.pass(&key).await, NOW);
        assert_eq!(self.pass(&key).await, NOW);
        assert_eq!(self.pass(&key).await, STEADY);
        self.api.clear_calls();
        key
    }

    async fn set_dnssec(&self, key: &ObjectKey, state: &str) {
        let mut object = self.store.get(key).await.unwrap().unwrap();
        object.spec.dnssec.state = state.to_string();
        self.store.update(&object).await.unwrap();
    }
}

fn zone_with_dnssec(state: &str) -> ManagedZone {
    ManagedZone {
        name: "team-zone".to_string(),
        dns_name: "team.example.com.".to_string(),
        description: "created by hand".to_string(),
        visibility: "public".to_string(),
        dnssec_config: Some(DnsSecConfig {
            state: state.to_string(),
            non_existence: "nsec3".to_string(),
        }),
        name_servers: vec!["ns-1.example.".to_string()],
    }
}

#[tokio::test]
async fn test_synchronous_create_converges() {
    let h = Harness::new();
    let key = key("zone");
    h.store.create(key.clone(), dns_spec("off", true)).await.unwrap();

    assert_eq!(h.pass(&key).await, NOW);
    assert!(h.api.calls().is_empty());

    // Cloud DNS creates zones synchronously: the record is done at once.
    assert_eq!(h.pass(&key).await, NOW);
    assert_eq!(h.api.mutating_calls(), vec!["create_zone"]);
    let status = h.status(&key).await;
    let record = status.operations.iter().next().unwrap();
    assert_eq!(record.kind, OperationKind::Create);
    assert!(record.succeeded());
    assert_eq!(status.nameservers, NAMESERVERS);

    assert_eq!(h.pass(&key).await, STEADY);
    let status = h.status(&key).await;
    assert!(status.ready);
    assert!(!status.reconciling);

    let zone = h.api.zone("team-zone").unwrap();
    assert_eq!(zone.dns_name, "team.example.com.");
    assert_eq!(zone.visibility, "public");
    assert_eq!(zone.description, "DnsZone managed by mcloud-controller");
}

#[tokio::test]
async fn test_dnssec_change_is_patched() {
    let h = Harness::new();
    let key = h.converged(dns_spec("off", true)).await;
    h.set_dnssec(&key, "On").await;

    assert_eq!(h.pass(&key).await, SHORT);
    assert_eq!(h.api.mutating_calls(), vec!["patch_zone"]);
    let status = h.status(&key).await;
    assert_eq!(status.operations.pending_of_kind(OperationKind::Update).count(), 1);

    assert_eq!(h.pass(&key).await, SHORT);

    h.api.complete_all();
    assert_eq!(h.pass(&key).await, STEADY);
    assert_eq!(h.api.zone("team-zone").unwrap().dnssec_state(), "on");
    let status = h.status(&key).await;
    assert!(status.ready);
    assert!(!status.operations.has_pending());
    assert_eq!(status.nameservers, NAMESERVERS);
    assert_eq!(h.api.mutating_calls(), vec!["patch_zone"]);
}

#[tokio::test]
async fn test_existing_zone_adopted_case_insensitively() {
    let h = Harness::new();
    h.api.insert_zone(zone_with_dnssec("ON"));
    let key = key("zone");
    h.store.create(key.clone(), dns_spec("on", true)).await.unwrap();

    h.pass(&key).await;
    assert_eq!(h.pass(&key).await, STEADY);
    assert!(h.api.mutating_calls().is_empty());
    let status = h.status(&key).await;
    assert!(status.ready);
    assert_eq!(status.nameservers, vec!["ns-1.example."]);
}

#[tokio::test]
async fn test_exact_policy_patches_case_difference() {
    let mut policy = DnsDiffPolicy::default();
    policy.set("dnssec_state", Compare::Exact).unwrap();
    let h = Harness::with_policy(policy);
    h.api.insert_zone(zone_with_dnssec("ON"));
    let key = key("zone");
    h.store.create(key.clone(), dns_spec("on", true)).await.unwrap();

    h.pass(&key).await;
    assert_eq!(h.pass(&key).await, SHORT);
    assert_eq!(h.api.mutating_calls(), vec!["patch_zone"]);
}

#[tokio::test]
async fn test_ignored_description_is_not_patched() {
    let h = Harness::new();
    h.api.insert_zone(zone_with_dnssec("off"));
    let key = key("zone");
    h.store.create(key.clone(), dns_spec("off", true)).await.unwrap();

    h.pass(&key).await;
    assert_eq!(h.pass(&key).await, STEADY);
    assert_eq!(h.api.zone("team-zone").unwrap().description, "created by hand");
}

#[tokio::test]
async fn test_deletion_without_cleanup_keeps_zone() {
    let h = Harness::new();
    let key = h.converged(dns_spec("off", false)).await;
    h.store.request_deletion(&key).await.unwrap();

    assert_eq!(h.pass(&key).await, Disposition::Done);
    assert!(h.store.get(&key).await.unwrap().is_none());
    assert!(h.api.zone("team-zone").is_some());
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn test_deletion_with_cleanup_removes_zone() {
    let h = Harness::new();
    let key = h.converged(dns_spec("off", true)).await;
    h.store.request_deletion(&key).await.unwrap();

    assert_eq!(h.pass(&key).await, NOW);
    assert_eq!(h.api.mutating_calls(), vec!["delete_zone"]);
    assert!(h.api.zone("team-zone").is_none());
    let object = h.store.get(&key).await.unwrap().unwrap();
    assert!(object.meta.guarded);
    let delete = object
        .status
        .operations
        .latest_of_kind(OperationKind::Delete)
        .unwrap();
    assert!(delete.succeeded());

    assert_eq!(h.pass(&key).await, Disposition::Done);
    assert!(h.store.get(&key).await.unwrap().is_none());
    assert_eq!(h.api.mutating_calls(), vec!["delete_zone"]);
}

#[tokio::test]
async fn test_delete_pending_patch_first() {
    let h = Harness::new();
    let key = h.converged(dns_spec("off", true)).await;
    h.set_dnssec(&key, "on").await;
    assert_eq!(h.pass(&key).await, SHORT);
    h.store.request_deletion(&key).await.unwrap();

    // The patch still runs: no delete yet.
    assert_eq!(h.pass(&key).await, SHORT);
    assert_eq!(h.api.mutating_calls(), vec!["patch_zone"]);

    h.api.complete_all();
    assert_eq!(h.pass(&key).await, NOW);
    assert_eq!(h.api.mutating_calls(), vec!["patch_zone", "delete_zone"]);
    assert_eq!(h.pass(&key).await, Disposition::Done);
}

#[tokio::test]
async fn test_forgotten_patch_is_reissued() {
    let h = Harness::new();
    let key = h.converged(dns_spec("off", true)).await;
    h.set_dnssec(&key, "on").await;
    assert_eq!(h.pass(&key).await, SHORT);

    h.api.forget_operations();
    assert_eq!(h.pass(&key).await, SHORT);
    assert_eq!(h.api.mutating_calls(), vec!["patch_zone", "patch_zone"]);
    let status = h.status(&key).await;
    assert_eq!(status.operations.len(), 3);
    assert_eq!(status.operations.pending().count(), 1);
}

#[tokio::test]
async fn test_transient_create_failure_records_nothing() {
    let h = Harness::new();
    let key = key("zone");
    h.store.create(key.clone(), dns_spec("off", true)).await.unwrap();
    h.pass(&key).await;

    h.api.fail_next("create_zone", RemoteError::Transient("503".into()));
    let err = h.reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(h.status(&key).await.operations.is_empty());

    assert_eq!(h.pass(&key).await, NOW);
    assert_eq!(h.api.mutating_calls(), vec!["create_zone", "create_zone"]);
}

#[tokio::test]
async fn test_invalid_zone_spec_is_rejected() {
    let h = Harness::new();
    let key = key("zone");
    let mut spec = dns_spec("off", true);
    spec.dns_name = String::new();
    h.store.create(key.clone(), spec).await.unwrap();
    h.pass(&key).await;

    let err = h.reconciler.reconcile(&key).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(h.api.calls().is_empty());
}
