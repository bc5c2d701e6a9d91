//! Cloud DNS managed zone spec and status.

use serde::{Deserialize, Serialize};

use super::ObservedStatus;
use crate::operations::OperationLog;

/// Declared managed zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneSpec {
    pub project_id: String,
    /// Zone apex, with or without the trailing dot.
    pub dns_name: String,
    #[serde(default)]
    pub private_zone: bool,
    #[serde(default)]
    pub dnssec: DnsSecSpec,
    /// Delete the remote zone when the object is deleted. When false the
    /// zone is left behind and only the object goes away.
    #[serde(default)]
    pub cleanup_on_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsSecSpec {
    /// "on", "off" or "transfer"; compared case-insensitively.
    #[serde(default = "default_dnssec_state")]
    pub state: String,
    #[serde(default)]
    pub non_existence: NonExistence,
}

impl Default for DnsSecSpec {
    fn default() -> Self {
        Self {
            state: default_dnssec_state(),
            non_existence: NonExistence::default(),
        }
    }
}

fn default_dnssec_state() -> String {
    "off".to_string()
}

/// Authenticated denial of existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonExistence {
    Nsec,
    #[default]
    Nsec3,
}

impl NonExistence {
    pub fn as_str(&self) -> &'static str {
        match self {
            NonExistence::Nsec => "nsec",
            NonExistence::Nsec3 => "nsec3",
        }
    }
}

impl DnsZoneSpec {
    /// The zone apex as the provider expects it, with a trailing dot.
    pub fn fqdn(&self) -> String {
        if self.dns_name.ends_with('.') {
            self.dns_name.clone()
        } else {
            format!("{}.", self.dns_name)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.trim().is_empty() {
            return Err("projectId must not be empty".to_string());
        }
        if self.dns_name.trim().trim_end_matches('.').is_empty() {
            return Err("dnsName must not be empty".to_string());
        }
        Ok(())
    }
}

/// Observed state of a managed zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub reconciling: bool,
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub operations: OperationLog,
}

impl ObservedStatus for DnsZoneStatus {
    fn operations(&self) -> &OperationLog {
        &self.operations
    }

    fn operations_mut(&mut self) -> &mut OperationLog {
        &mut self.operations
    }

    fn set_progress(&mut self, ready: bool, reconciling: bool) {
        self.ready = ready;
        self.reconciling = reconciling;
    }
}
