use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::Api;
use tracing::{debug, info};

use crate::cloud::auth::EksClientFactory;
use crate::error::{classify_kube, CloudError};

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    ReplicaSet,
    DaemonSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::ReplicaSet => "replicaset",
            WorkloadKind::DaemonSet => "daemonset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub replicas: i32,
    /// True when another controller owns this object (e.g. a ReplicaSet
    /// managed by a Deployment). Owned objects are never scaled directly.
    pub owned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerView {
    pub restart_count: i32,
    pub ready: bool,
    pub waiting_reason: Option<String>,
    pub terminated_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodView {
    pub name: String,
    pub phase: String,
    pub owner: Option<String>,
    pub created: Option<String>,
    pub containers: Vec<ContainerView>,
    pub init_waiting_reasons: Vec<String>,
}

impl PodView {
    pub fn all_containers_ready(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| c.ready)
    }

    /// Terminal pod phases left behind after a drain.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase.as_str(), "Succeeded" | "Failed")
    }
}

pub const DRAIN_DEADLINE: Duration = Duration::from_secs(300);
const DRAIN_POLL: Duration = Duration::from_secs(5);

const RESTART_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/* ============================= TRAIT ============================= */

#[async_trait]
pub trait WorkloadControl: Send + Sync {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, CloudError>;

    async fn scale_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), CloudError>;

    /// DaemonSets are restarted by bumping a template annotation, never
    /// scaled.
    async fn restart_daemonset(&self, namespace: &str, name: &str) -> Result<(), CloudError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodView>, CloudError>;

    /// Poll until every pod in the namespace is in a terminal phase, or the
    /// deadline elapses. Returns whether the namespace fully drained.
    async fn wait_pods_terminated(&self, namespace: &str, deadline: Duration) -> Result<bool, CloudError> {
        let stop_at = tokio::time::Instant::now() + deadline;
        loop {
            let pods = self.list_pods(namespace).await?;
            let remaining: Vec<&PodView> = pods.iter().filter(|p| !p.is_terminal()).collect();
            if remaining.is_empty() {
                return Ok(true);
            }
            debug!(namespace, remaining = remaining.len(), "pods_still_terminating");
            if tokio::time::Instant::now() >= stop_at {
                return Ok(false);
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

/* ============================= POD MAPPING ============================= */

/// Flatten a Kubernetes pod into the view the aggregator and orchestrators
/// consume.
pub fn pod_view_from(pod: &Pod) -> PodView {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let owner = pod.metadata.owner_references.as_ref().and_then(|refs| {
        refs.first().map(|r| format!("{}/{}", r.kind.to_lowercase(), r.name))
    });
    let created = pod.metadata.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339());

    let mut phase = String::new();
    let mut containers = Vec::new();
    let mut init_waiting_reasons = Vec::new();

    if let Some(status) = &pod.status {
        phase = status.phase.clone().unwrap_or_default();

        for cs in status.container_statuses.iter().flatten() {
            let waiting_reason = cs
                .state
                .as_ref()
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.clone());
            let terminated_reason = cs
                .state
                .as_ref()
                .and_then(|s| s.terminated.as_ref())
                .and_then(|t| t.reason.clone());
            containers.push(ContainerView {
                restart_count: cs.restart_count,
                ready: cs.ready,
                waiting_reason,
                terminated_reason,
            });
        }

        for init_status in status.init_container_statuses.iter().flatten() {
            if let Some(reason) = init_status
                .state
                .as_ref()
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.clone())
            {
                init_waiting_reasons.push(reason);
            }
        }
    }

    PodView { name, phase, owner, created, containers, init_waiting_reasons }
}

fn has_owner(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> bool {
    meta.owner_references.as_ref().is_some_and(|refs| !refs.is_empty())
}

/* ============================= KUBE IMPLEMENTATION ============================= */

/// Workload control against the managed cluster. A fresh client (and with
/// it a fresh 60 s control-plane token) is built for every call so that
/// external RBAC changes are picked up.
pub struct KubeWorkloads {
    factory: EksClientFactory,
}

impl KubeWorkloads {
    pub fn new(factory: EksClientFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl WorkloadControl for KubeWorkloads {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, CloudError> {
        let client = self.factory.client().await?;
        let lp = ListParams::default();
        let mut workloads = Vec::new();

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        for d in deployments.list(&lp).await.map_err(|e| classify_kube(&e))? {
            workloads.push(Workload {
                kind: WorkloadKind::Deployment,
                name: d.metadata.name.clone().unwrap_or_default(),
                replicas: d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
                owned: has_owner(&d.metadata),
            });
        }

        let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
        for s in statefulsets.list(&lp).await.map_err(|e| classify_kube(&e))? {
            workloads.push(Workload {
                kind: WorkloadKind::StatefulSet,
                name: s.metadata.name.clone().unwrap_or_default(),
                replicas: s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
                owned: has_owner(&s.metadata),
            });
        }

        let replicasets: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
        for r in replicasets.list(&lp).await.map_err(|e| classify_kube(&e))? {
            workloads.push(Workload {
                kind: WorkloadKind::ReplicaSet,
                name: r.metadata.name.clone().unwrap_or_default(),
                replicas: r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
                owned: has_owner(&r.metadata),
            });
        }

        let daemonsets: Api<DaemonSet> = Api::namespaced(client, namespace);
        for d in daemonsets.list(&lp).await.map_err(|e| classify_kube(&e))? {
            workloads.push(Workload {
                kind: WorkloadKind::DaemonSet,
                name: d.metadata.name.clone().unwrap_or_default(),
                replicas: 0,
                owned: has_owner(&d.metadata),
            });
        }

        Ok(workloads)
    }

    async fn scale_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), CloudError> {
        let client = self.factory.client().await?;
        let pp = PatchParams::default();
        let patch = Patch::Merge(serde_json::json!({ "spec": { "replicas": replicas } }));

        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);
                api.patch_scale(name, &pp, &patch).await.map_err(|e| classify_kube(&e))?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(client, namespace);
                api.patch_scale(name, &pp, &patch).await.map_err(|e| classify_kube(&e))?;
            }
            WorkloadKind::ReplicaSet => {
                let api: Api<ReplicaSet> = Api::namespaced(client, namespace);
                api.patch_scale(name, &pp, &patch).await.map_err(|e| classify_kube(&e))?;
            }
            WorkloadKind::DaemonSet => {
                return Err(CloudError::Conflict(format!(
                    "daemonset {namespace}/{name} cannot be scaled; restart it instead"
                )));
            }
        }

        info!(kind = kind.as_str(), namespace, name, replicas, "workload_scaled");
        Ok(())
    }

    async fn restart_daemonset(&self, namespace: &str, name: &str) -> Result<(), CloudError> {
        let client = self.factory.client().await?;
        let api: Api<DaemonSet> = Api::namespaced(client, namespace);
        let stamp = chrono::Utc::now().to_rfc3339();
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": { RESTART_ANNOTATION: stamp } } } }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify_kube(&e))?;
        info!(namespace, name, "daemonset_restarted");
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodView>, CloudError> {
        let client = self.factory.client().await?;
        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let list = pods.list(&ListParams::default()).await.map_err(|e| classify_kube(&e))?;
        Ok(list.items.iter().map(pod_view_from).collect())
    }
}

/* ============================= TESTS ============================= */
