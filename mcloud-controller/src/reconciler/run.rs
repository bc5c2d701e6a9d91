//! CloudRun reconciler - manages Cloud Run services.
//!
//! Every mutating call returns a long-running operation. Updates always send
//! the complete desired service; the diff only decides whether to send it.
//! Invoker bindings are re-applied on every in-sync pass.

use async_trait::async_trait;

use super::diff::Compare;
use super::{ObjectOf, OperationHandle, PollOutcome, RemoteProvider};
use crate::clients::run::{
    Container, ContainerPort, GrpcAction, HttpGetAction, IngressTraffic, Operation, Probe,
    RevisionTemplate, RunApi, Service, ServiceName, TcpSocketAction, TrafficTarget,
    TrafficTargetType,
};
use crate::error::RemoteError;
use crate::model::run::{
    CloudRunSpec, CloudRunStatus, ContainerSpec, Ingress, ProbeCheck, ProbeSpec,
};
use crate::model::Object;
use crate::operations::OperationRecord;

/// Which service fields trigger an update when they diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDiffPolicy {
    /// Container images, by position.
    pub image: Compare,
    /// Ports and probes.
    pub containers: Compare,
    pub traffic: Compare,
    pub ingress: Compare,
}

impl Default for RunDiffPolicy {
    fn default() -> Self {
        Self {
            image: Compare::Exact,
            containers: Compare::Ignore,
            traffic: Compare::Ignore,
            ingress: Compare::Ignore,
        }
    }
}

impl RunDiffPolicy {
    pub const FIELDS: &'static [&'static str] = &["image", "containers", "traffic", "ingress"];

    pub fn set(&mut self, field: &str, compare: Compare) -> Result<(), String> {
        match field {
            "image" => self.image = compare,
            "containers" => self.containers = compare,
            "traffic" => self.traffic = compare,
            "ingress" => self.ingress = compare,
            other => {
                return Err(format!(
                    "run has no tracked field {:?}, expected one of {:?}",
                    other,
                    Self::FIELDS
                ))
            }
        }
        Ok(())
    }
}

/// Provider adapter for Cloud Run services.
pub struct CloudRunProvider<C> {
    client: C,
    policy: RunDiffPolicy,
}

impl<C: RunApi> CloudRunProvider<C> {
    pub fn new(client: C, policy: RunDiffPolicy) -> Self {
        Self { client, policy }
    }

    pub fn service_name(object: &Object<CloudRunSpec, CloudRunStatus>) -> ServiceName {
        ServiceName {
            project: object.spec.project_id.clone(),
            location: object.spec.location.clone(),
            service_id: object.key().remote_name(),
        }
    }
}

/// The service the spec describes.
pub fn desired_service(spec: &CloudRunSpec) -> Service {
    Service {
        ingress: ingress_traffic(spec.ingress),
        template: RevisionTemplate {
            containers: spec.containers.iter().map(container).collect(),
        },
        traffic: traffic_targets(spec),
        ..Default::default()
    }
}

fn container(spec: &ContainerSpec) -> Container {
    Container {
        name: spec.name.clone(),
        image: spec.image.clone(),
        ports: vec![ContainerPort {
            container_port: spec.port,
        }],
        liveness_probe: spec.liveness_probe.as_ref().map(probe),
        startup_probe: spec.startup_probe.as_ref().map(probe),
    }
}

fn probe(spec: &ProbeSpec) -> Probe {
    let mut probe = Probe {
        initial_delay_seconds: spec.initial_delay_seconds,
        timeout_seconds: spec.timeout_seconds,
        period_seconds: spec.period_seconds,
        failure_threshold: spec.failure_threshold,
        ..Default::default()
    };
    match &spec.check {
        ProbeCheck::HttpGet { path } => {
            probe.http_get = Some(HttpGetAction {
                path: path.clone(),
                port: spec.port,
            })
        }
        ProbeCheck::TcpSocket => probe.tcp_socket = Some(TcpSocketAction { port: spec.port }),
        ProbeCheck::Grpc { service } => {
            probe.grpc = Some(GrpcAction {
                port: spec.port,
                service: service.clone().unwrap_or_default(),
            })
        }
    }
    probe
}

fn traffic_targets(spec: &CloudRunSpec) -> Vec<TrafficTarget> {
    if spec.traffic.is_empty() {
        return vec![TrafficTarget {
            kind: TrafficTargetType::Latest,
            revision: String::new(),
            percent: 100,
        }];
    }
    spec.traffic
        .iter()
        .map(|t| {
            if t.latest_revision {
                TrafficTarget {
                    kind: TrafficTargetType::Latest,
                    revision: String::new(),
                    percent: t.percent,
                }
            } else {
                TrafficTarget {
                    kind: TrafficTargetType::Revision,
                    revision: t.revision.clone(),
                    percent: t.percent,
                }
            }
        })
        .collect()
}

fn ingress_traffic(ingress: Ingress) -> IngressTraffic {
    match ingress {
        Ingress::All => IngressTraffic::All,
        Ingress::InternalOnly => IngressTraffic::InternalOnly,
        Ingress::InternalLoadBalancer => IngressTraffic::InternalLoadBalancer,
    }
}

fn handle(op: Operation) -> Result<OperationHandle<Service>, RemoteError> {
    if let Some(err) = op.error.filter(|_| op.done) {
        return Err(RemoteError::Transient(format!(
            "operation {} failed with code {}: {}",
            op.name, err.code, err.message
        )));
    }
    Ok(OperationHandle {
        name: op.name,
        done: op.done,
        result: op.response,
    })
}

#[async_trait]
impl<C: RunApi> RemoteProvider for CloudRunProvider<C> {
    type Spec = CloudRunSpec;
    type Status = CloudRunStatus;
    type Remote = Service;

    fn kind(&self) -> &'static str {
        "CloudRun"
    }

    fn validate(&self, spec: &CloudRunSpec) -> Result<(), String> {
        spec.validate()
    }

    async fn fetch(&self, object: &ObjectOf<Self>) -> Result<Service, RemoteError> {
        self.client.get_service(&Self::service_name(object)).await
    }

    async fn create(
        &self,
        object: &ObjectOf<Self>,
    ) -> Result<OperationHandle<Service>, RemoteError> {
        let op = self
            .client
            .create_service(&Self::service_name(object), &desired_service(&object.spec))
            .await?;
        handle(op)
    }

    async fn update(
        &self,
        object: &ObjectOf<Self>,
        current: Service,
    ) -> Result<OperationHandle<Service>, RemoteError> {
        let mut desired = desired_service(&object.spec);
        desired.name = current.name;
        desired.etag = current.etag;
        let op = self
            .client
            .update_service(&Self::service_name(object), &desired)
            .await?;
        handle(op)
    }

    async fn delete(
        &self,
        object: &ObjectOf<Self>,
    ) -> Result<OperationHandle<Service>, RemoteError> {
        let op = self
            .client
            .delete_service(&Self::service_name(object))
            .await?;
        // A deleted service's final state is of no use.
        let mut accepted = handle(op)?;
        accepted.result = None;
        Ok(accepted)
    }

    async fn poll(
        &self,
        _object: &ObjectOf<Self>,
        record: &OperationRecord,
    ) -> Result<PollOutcome<Service>, RemoteError> {
        let op = self.client.get_operation(&record.name).await?;
        Ok(PollOutcome {
            done: op.done,
            error: op
                .error
                .filter(|_| op.done)
                .map(|e| format!("code {}: {}", e.code, e.message)),
            result: op.response,
        })
    }

    fn diff(&self, spec: &CloudRunSpec, remote: &Service) -> Vec<&'static str> {
        let desired = desired_service(spec);
        let mut fields = Vec::new();

        let desired_images: Vec<&str> = desired
            .template
            .containers
            .iter()
            .map(|c| c.image.as_str())
            .collect();
        let remote_images: Vec<&str> = remote
            .template
            .containers
            .iter()
            .map(|c| c.image.as_str())
            .collect();
        let images_differ = desired_images.len() != remote_images.len()
            || desired_images
                .iter()
                .zip(&remote_images)
                .any(|(d, r)| self.policy.image.str_differs(d, r));
        if self.policy.image != Compare::Ignore && images_differ {
            fields.push("image");
        }

        let shape = |c: &Container| {
            (
                c.ports.clone(),
                c.liveness_probe.clone(),
                c.startup_probe.clone(),
            )
        };
        let desired_shape: Vec<_> = desired.template.containers.iter().map(shape).collect();
        let remote_shape: Vec<_> = remote.template.containers.iter().map(shape).collect();
        if self.policy.containers.differs(&desired_shape, &remote_shape) {
            fields.push("containers");
        }

        if self.policy.traffic.differs(&desired.traffic, &remote.traffic) {
            fields.push("traffic");
        }
        if self.policy.ingress.differs(&desired.ingress, &remote.ingress) {
            fields.push("ingress");
        }
        fields
    }

    fn observe(&self, status: &mut CloudRunStatus, remote: &Service) {
        if !remote.uri.is_empty() {
            status.uri = Some(remote.uri.clone());
        }
        if !remote.latest_ready_revision.is_empty() {
            status.latest_ready_revision = Some(remote.latest_ready_revision.clone());
            status.push_revision(&remote.latest_ready_revision);
        }
    }

    async fn converged(
        &self,
        object: &ObjectOf<Self>,
        _remote: &Service,
    ) -> Result<(), RemoteError> {
        self.client
            .set_invokers(&Self::service_name(object), &object.spec.invoke_members)
            .await
    }

    fn cleanup_on_delete(&self, spec: &CloudRunSpec) -> bool {
        spec.cleanup_on_delete
    }
}
