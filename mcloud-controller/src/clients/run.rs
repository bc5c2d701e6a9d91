//! Client for the Cloud Run v2 Admin API.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::GcpHttp;
use crate::error::RemoteError;

pub const DEFAULT_RUN_ENDPOINT: &str = "https://run.googleapis.com";

const INVOKER_ROLE: &str = "roles/run.invoker";

/// Fully qualified service location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    pub project: String,
    pub location: String,
    pub service_id: String,
}

impl ServiceName {
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/services/{}", self.parent(), self.service_id)
    }
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Service resource. Only the fields the reconciler manages are modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_ready_revision: String,
    #[serde(default)]
    pub ingress: IngressTraffic,
    #[serde(default)]
    pub template: RevisionTemplate,
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngressTraffic {
    #[default]
    #[serde(rename = "INGRESS_TRAFFIC_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "INGRESS_TRAFFIC_ALL")]
    All,
    #[serde(rename = "INGRESS_TRAFFIC_INTERNAL_ONLY")]
    InternalOnly,
    #[serde(rename = "INGRESS_TRAFFIC_INTERNAL_LOAD_BALANCER")]
    InternalLoadBalancer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplate {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub initial_delay_seconds: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout_seconds: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub period_seconds: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failure_threshold: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpSocketAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<GrpcAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetAction {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSocketAction {
    #[serde(default)]
    pub port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcAction {
    #[serde(default)]
    pub port: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    #[serde(rename = "type", default)]
    pub kind: TrafficTargetType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default)]
    pub percent: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficTargetType {
    #[default]
    #[serde(rename = "TRAFFIC_TARGET_ALLOCATION_TYPE_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "TRAFFIC_TARGET_ALLOCATION_TYPE_LATEST")]
    Latest,
    #[serde(rename = "TRAFFIC_TARGET_ALLOCATION_TYPE_REVISION")]
    Revision,
}

/// google.longrunning.Operation carrying a Service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Service>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamPolicy {
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SetIamPolicyRequest<'a> {
    policy: &'a IamPolicy,
}

/// Service capabilities used by the Cloud Run reconciler.
#[async_trait]
pub trait RunApi: Send + Sync + 'static {
    async fn get_service(&self, name: &ServiceName) -> Result<Service, RemoteError>;

    async fn create_service(
        &self,
        name: &ServiceName,
        service: &Service,
    ) -> Result<Operation, RemoteError>;

    /// Replace the service with `service` as a whole.
    async fn update_service(
        &self,
        name: &ServiceName,
        service: &Service,
    ) -> Result<Operation, RemoteError>;

    async fn delete_service(&self, name: &ServiceName) -> Result<Operation, RemoteError>;

    async fn get_operation(&self, operation: &str) -> Result<Operation, RemoteError>;

    /// Make `members` the only holders of the invoker role on the service.
    async fn set_invokers(&self, name: &ServiceName, members: &[String])
        -> Result<(), RemoteError>;
}

/// HTTP client for Cloud Run.
#[derive(Clone)]
pub struct CloudRunClient {
    http: GcpHttp,
    endpoint: String,
}

impl CloudRunClient {
    pub fn new(http: GcpHttp, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, resource: impl fmt::Display) -> String {
        format!("{}/v2/{}", self.endpoint, resource)
    }
}

/// Policy granting the invoker role to exactly `members`.
pub fn invoker_policy(members: &[String]) -> IamPolicy {
    if members.is_empty() {
        return IamPolicy::default();
    }
    IamPolicy {
        bindings: vec![IamBinding {
            role: INVOKER_ROLE.to_string(),
            members: members.to_vec(),
        }],
    }
}

#[async_trait]
impl RunApi for CloudRunClient {
    async fn get_service(&self, name: &ServiceName) -> Result<Service, RemoteError> {
        debug!("Getting Cloud Run service {}", name);
        self.http.get(&self.url(name)).await
    }

    async fn create_service(
        &self,
        name: &ServiceName,
        service: &Service,
    ) -> Result<Operation, RemoteError> {
        debug!("Creating Cloud Run service {}", name);
        let url = format!(
            "{}/services?serviceId={}",
            self.url(name.parent()),
            name.service_id
        );
        self.http.post(&url, service).await
    }

    async fn update_service(
        &self,
        name: &ServiceName,
        service: &Service,
    ) -> Result<Operation, RemoteError> {
        debug!("Updating Cloud Run service {}", name);
        self.http.patch(&self.url(name), service).await
    }

    async fn delete_service(&self, name: &ServiceName) -> Result<Operation, RemoteError> {
        debug!("Deleting Cloud Run service {}", name);
        self.http.delete(&self.url(name)).await
    }

    async fn get_operation(&self, operation: &str) -> Result<Operation, RemoteError> {
        self.http.get(&self.url(operation)).await
    }

    async fn set_invokers(
        &self,
        name: &ServiceName,
        members: &[String],
    ) -> Result<(), RemoteError> {
        debug!("Setting invokers on {}: {:?}", name, members);
        let url = format!("{}:setIamPolicy", self.url(name));
        let policy = invoker_policy(members);
        let _: IamPolicy = self
            .http
            .post(&url, &SetIamPolicyRequest { policy: &policy })
            .await?;
        Ok(())
    }
}
