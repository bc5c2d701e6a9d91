//! DnsZone reconciler - manages Cloud DNS managed zones.

use async_trait::async_trait;
use uuid::Uuid;

use super::diff::Compare;
use super::{ObjectOf, OperationHandle, PollOutcome, RemoteProvider};
use crate::clients::dns::{DnsApi, DnsSecConfig, ManagedZone};
use crate::error::RemoteError;
use crate::model::dns::{DnsZoneSpec, DnsZoneStatus};
use crate::model::Object;
use crate::operations::OperationRecord;

const ZONE_DESCRIPTION: &str = "DnsZone managed by mcloud-controller";

/// Which zone fields trigger an update when they diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsDiffPolicy {
    pub dnssec_state: Compare,
    pub description: Compare,
}

impl Default for DnsDiffPolicy {
    fn default() -> Self {
        Self {
            dnssec_state: Compare::CaseInsensitive,
            description: Compare::Ignore,
        }
    }
}

impl DnsDiffPolicy {
    pub const FIELDS: &'static [&'static str] = &["dnssec_state", "description"];

    pub fn set(&mut self, field: &str, compare: Compare) -> Result<(), String> {
        match field {
            "dnssec_state" => self.dnssec_state = compare,
            "description" => self.description = compare,
            other => {
                return Err(format!(
                    "dns has no tracked field {:?}, expected one of {:?}",
                    other,
                    Self::FIELDS
                ))
            }
        }
        Ok(())
    }
}

/// Provider adapter for managed zones.
pub struct DnsZoneProvider<C> {
    client: C,
    policy: DnsDiffPolicy,
}

impl<C: DnsApi> DnsZoneProvider<C> {
    pub fn new(client: C, policy: DnsDiffPolicy) -> Self {
        Self { client, policy }
    }

    /// The zone the spec describes, named after the object.
    pub fn desired_zone(object: &Object<DnsZoneSpec, DnsZoneStatus>) -> ManagedZone {
        let spec = &object.spec;
        ManagedZone {
            name: object.key().remote_name(),
            dns_name: spec.fqdn(),
            description: ZONE_DESCRIPTION.to_string(),
            visibility: if spec.private_zone { "private" } else { "public" }.to_string(),
            dnssec_config: Some(DnsSecConfig {
                state: spec.dnssec.state.to_lowercase(),
                non_existence: spec.dnssec.non_existence.as_str().to_string(),
            }),
            name_servers: Vec::new(),
        }
    }
}

/// Synchronous provider calls have no operation of their own.
fn completed(result: Option<ManagedZone>) -> OperationHandle<ManagedZone> {
    OperationHandle {
        name: Uuid::new_v4().to_string(),
        done: true,
        result,
    }
}

#[async_trait]
impl<C: DnsApi> RemoteProvider for DnsZoneProvider<C> {
    type Spec = DnsZoneSpec;
    type Status = DnsZoneStatus;
    type Remote = ManagedZone;

    fn kind(&self) -> &'static str {
        "DnsZone"
    }

    fn validate(&self, spec: &DnsZoneSpec) -> Result<(), String> {
        spec.validate()
    }

    async fn fetch(&self, object: &ObjectOf<Self>) -> Result<ManagedZone, RemoteError> {
        self.client
            .get_zone(&object.spec.project_id, &object.key().remote_name())
            .await
    }

    async fn create(
        &self,
        object: &ObjectOf<Self>,
    ) -> Result<OperationHandle<ManagedZone>, RemoteError> {
        let zone = self
            .client
            .create_zone(&object.spec.project_id, &Self::desired_zone(object))
            .await?;
        Ok(completed(Some(zone)))
    }

    async fn update(
        &self,
        object: &ObjectOf<Self>,
        current: ManagedZone,
    ) -> Result<OperationHandle<ManagedZone>, RemoteError> {
        let mut desired = Self::desired_zone(object);
        desired.name = current.name;
        let op = self
            .client
            .patch_zone(&object.spec.project_id, &desired.name, &desired)
            .await?;
        Ok(OperationHandle {
            done: op.is_done(),
            result: op.new_value().cloned(),
            name: op.id,
        })
    }

    async fn delete(
        &self,
        object: &ObjectOf<Self>,
    ) -> Result<OperationHandle<ManagedZone>, RemoteError> {
        self.client
            .delete_zone(&object.spec.project_id, &object.key().remote_name())
            .await?;
        Ok(completed(None))
    }

    async fn poll(
        &self,
        object: &ObjectOf<Self>,
        record: &OperationRecord,
    ) -> Result<PollOutcome<ManagedZone>, RemoteError> {
        let op = self
            .client
            .get_operation(
                &object.spec.project_id,
                &object.key().remote_name(),
                &record.name,
            )
            .await?;
        Ok(PollOutcome {
            done: op.is_done(),
            result: op.new_value().cloned(),
            error: None,
        })
    }

    fn diff(&self, spec: &DnsZoneSpec, remote: &ManagedZone) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self
            .policy
            .dnssec_state
            .str_differs(&spec.dnssec.state, remote.dnssec_state())
        {
            fields.push("dnssec_state");
        }
        if self
            .policy
            .description
            .str_differs(ZONE_DESCRIPTION, &remote.description)
        {
            fields.push("description");
        }
        fields
    }

    fn observe(&self, status: &mut DnsZoneStatus, remote: &ManagedZone) {
        if !remote.name_servers.is_empty() {
            status.nameservers = remote.name_servers.clone();
        }
    }

    fn cleanup_on_delete(&self, spec: &DnsZoneSpec) -> bool {
        spec.cleanup_on_delete
    }
}
