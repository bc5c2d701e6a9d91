//! Client for the Cloud DNS v1 API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::GcpHttp;
use crate::error::RemoteError;

pub const DEFAULT_DNS_ENDPOINT: &str = "https://dns.googleapis.com";

/// Managed zone as Cloud DNS represents it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedZone {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dns_name: String,
    #[serde(default)]
    pub description: String,
    /// "public" or "private".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub visibility: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnssec_config: Option<DnsSecConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_servers: Vec<String>,
}

const DNSSEC_OFF: &str = "off";

impl ManagedZone {
    /// DNSSEC state. Zones without a DNSSEC config (private zones) are "off".
    pub fn dnssec_state(&self) -> &str {
        self.dnssec_config
            .as_ref()
            .map(|c| c.state.as_str())
            .unwrap_or(DNSSEC_OFF)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsSecConfig {
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub non_existence: String,
}

/// A zone change operation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsOperation {
    pub id: String,
    /// "pending" or "done".
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub zone_context: Option<ZoneContext>,
}

impl DnsOperation {
    pub fn is_done(&self) -> bool {
        self.status.eq_ignore_ascii_case("done")
    }

    /// Zone state after the change, when the provider includes it.
    pub fn new_value(&self) -> Option<&ManagedZone> {
        self.zone_context.as_ref().and_then(|c| c.new_value.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneContext {
    #[serde(default)]
    pub old_value: Option<ManagedZone>,
    #[serde(default)]
    pub new_value: Option<ManagedZone>,
}

/// Managed zone capabilities used by the DNS reconciler.
#[async_trait]
pub trait DnsApi: Send + Sync + 'static {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<ManagedZone, RemoteError>;

    /// Create a zone. Cloud DNS completes this synchronously.
    async fn create_zone(&self, project: &str, zone: &ManagedZone)
        -> Result<ManagedZone, RemoteError>;

    async fn patch_zone(
        &self,
        project: &str,
        zone_name: &str,
        zone: &ManagedZone,
    ) -> Result<DnsOperation, RemoteError>;

    /// Delete a zone. Cloud DNS completes this synchronously.
    async fn delete_zone(&self, project: &str, zone: &str) -> Result<(), RemoteError>;

    async fn get_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<DnsOperation, RemoteError>;
}

/// HTTP client for Cloud DNS.
#[derive(Clone)]
pub struct CloudDnsClient {
    http: GcpHttp,
    endpoint: String,
}

impl CloudDnsClient {
    pub fn new(http: GcpHttp, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn zones_url(&self, project: &str) -> String {
        format!("{}/dns/v1/projects/{}/managedZones", self.endpoint, project)
    }

    fn zone_url(&self, project: &str, zone: &str) -> String {
        format!("{}/{}", self.zones_url(project), zone)
    }
}

#[async_trait]
impl DnsApi for CloudDnsClient {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<ManagedZone, RemoteError> {
        debug!("Getting managed zone {} in {}", zone, project);
        self.http.get(&self.zone_url(project, zone)).await
    }

    async fn create_zone(
        &self,
        project: &str,
        zone: &ManagedZone,
    ) -> Result<ManagedZone, RemoteError> {
        debug!("Creating managed zone {} in {}", zone.name, project);
        self.http.post(&self.zones_url(project), zone).await
    }

    async fn patch_zone(
        &self,
        project: &str,
        zone_name: &str,
        zone: &ManagedZone,
    ) -> Result<DnsOperation, RemoteError> {
        debug!("Patching managed zone {} in {}", zone_name, project);
        self.http.patch(&self.zone_url(project, zone_name), zone).await
    }

    async fn delete_zone(&self, project: &str, zone: &str) -> Result<(), RemoteError> {
        debug!("Deleting managed zone {} in {}", zone, project);
        self.http.delete_empty(&self.zone_url(project, zone)).await
    }

    async fn get_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<DnsOperation, RemoteError> {
        let url = format!("{}/operations/{}", self.zone_url(project, zone), operation);
        self.http.get(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_format() {
        let op: DnsOperation = serde_json::from_str(
            r#"{
                "id": "42",
                "status": "DONE",
                "zoneContext": {"newValue": {"name": "team-zone", "nameServers": ["ns-1."]}}
            }"#,
        )
        .unwrap();
        assert!(op.is_done());
        assert_eq!(op.new_value().unwrap().name_servers, vec!["ns-1."]);
    }

    #[test]
    fn test_zone_urls() {
        let http = GcpHttp::new(None, std::time::Duration::from_secs(1)).unwrap();
        let client = CloudDnsClient::new(http, "http://localhost:8080/");
        assert_eq!(
            client.zone_url("proj", "team-zone"),
            "http://localhost:8080/dns/v1/projects/proj/managedZones/team-zone"
        );
    }
}
