//! Cloud Run service spec and status.

use serde::{Deserialize, Serialize};

use super::ObservedStatus;
use crate::operations::OperationLog;

/// Declared Cloud Run service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRunSpec {
    pub project_id: String,
    pub location: String,
    pub containers: Vec<ContainerSpec>,
    /// Traffic split. Empty sends everything to the latest revision.
    #[serde(default)]
    pub traffic: Vec<TrafficSpec>,
    #[serde(default)]
    pub ingress: Ingress,
    /// Principals granted `roles/run.invoker`.
    #[serde(default)]
    pub invoke_members: Vec<String>,
    #[serde(default = "default_true")]
    pub cleanup_on_delete: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub port: i32,
    #[serde(default)]
    pub liveness_probe: Option<ProbeSpec>,
    #[serde(default)]
    pub startup_probe: Option<ProbeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    pub check: ProbeCheck,
    pub port: i32,
    #[serde(default)]
    pub initial_delay_seconds: i32,
    #[serde(default)]
    pub timeout_seconds: i32,
    #[serde(default)]
    pub period_seconds: i32,
    #[serde(default)]
    pub failure_threshold: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProbeCheck {
    HttpGet { path: String },
    TcpSocket,
    Grpc {
        #[serde(default)]
        service: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSpec {
    #[serde(default)]
    pub revision: String,
    pub percent: i32,
    #[serde(default)]
    pub latest_revision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ingress {
    #[default]
    All,
    InternalOnly,
    InternalLoadBalancer,
}

impl CloudRunSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.trim().is_empty() || self.location.trim().is_empty() {
            return Err("projectId and location must not be empty".to_string());
        }
        if self.containers.is_empty() {
            return Err("at least one container is required".to_string());
        }
        for container in &self.containers {
            if container.image.trim().is_empty() {
                return Err(format!("container {:?} has no image", container.name));
            }
            for probe in [&container.liveness_probe, &container.startup_probe]
                .into_iter()
                .flatten()
            {
                if let ProbeCheck::HttpGet { path } = &probe.check {
                    if path.is_empty() {
                        return Err(format!(
                            "httpGet probe of container {:?} needs a path",
                            container.name
                        ));
                    }
                }
            }
        }
        if !self.traffic.is_empty() {
            let total: i32 = self.traffic.iter().map(|t| t.percent).sum();
            if total != 100 {
                return Err(format!("traffic percentages sum to {}, not 100", total));
            }
            if let Some(t) = self
                .traffic
                .iter()
                .find(|t| !t.latest_revision && t.revision.is_empty())
            {
                return Err(format!(
                    "traffic target with {}% names no revision",
                    t.percent
                ));
            }
        }
        Ok(())
    }
}

/// Observed state of a Cloud Run service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRunStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub reconciling: bool,
    #[serde(default)]
    pub operations: OperationLog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ready_revision: Option<String>,
    /// Every revision seen ready, oldest first.
    #[serde(default)]
    pub revisions: Vec<String>,
}

impl CloudRunStatus {
    /// Remember a ready revision unless it is already the newest entry.
    pub fn push_revision(&mut self, revision: &str) {
        if revision.is_empty() || self.revisions.last().map(String::as_str) == Some(revision) {
            return;
        }
        self.revisions.push(revision.to_string());
    }
}

impl ObservedStatus for CloudRunStatus {
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
