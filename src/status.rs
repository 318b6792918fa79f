use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cloud::nodegroups::NgStatus;
use crate::cloud::probes::HttpVerdict;
use crate::cloud::workloads::PodView;
use crate::error::CloudError;
use crate::runtime::Runtime;
use crate::sharing::{self, DbKind};

/* ============================= DEADLINES ============================= */

const DB_PROBE_DEADLINE: Duration = Duration::from_secs(30);
const HTTP_PROBE_DEADLINE: Duration = Duration::from_secs(10);
const PODS_PROBE_DEADLINE: Duration = Duration::from_secs(30);
const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

const FLEET_PARALLELISM: usize = 10;
const PER_APP_DEADLINE: Duration = Duration::from_secs(60);

/* ============================= DOCUMENT ============================= */

/// The live status document for one application. Recomputed by probing on
/// every request, never served from cache.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeStatus {
    pub name: String,
    /// Overall verdict. HTTP is authoritative: UP iff the live HTTP probe
    /// landed in the acceptance set, regardless of component states.
    pub status: String,
    pub hostname: Option<String>,
    pub hostnames: Vec<String>,
    pub namespace: String,
    pub http: HttpReport,
    pub postgres: DbReport,
    pub neo4j: DbReport,
    pub nodegroups: Vec<NodegroupReport>,
    pub pods: PodTally,
    pub last_checked: String,
}

impl CompositeStatus {
    /// Placeholder for an application whose aggregation failed outright.
    pub fn failed(name: &str, error: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "DOWN".to_string(),
            hostname: None,
            hostnames: Vec::new(),
            namespace: String::new(),
            http: HttpReport::down(),
            postgres: DbReport::stopped(None, None),
            neo4j: DbReport::stopped(None, None),
            nodegroups: Vec::new(),
            pods: PodTally::failed(error),
            last_checked: "live".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpReport {
    pub status: String,
    pub code: Option<u16>,
    pub latency_ms: Option<u64>,
}

impl HttpReport {
    pub fn down() -> Self {
        Self { status: "DOWN".to_string(), code: None, latency_ms: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DbReport {
    pub state: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub is_shared: bool,
    pub shared_with: Vec<String>,
}

impl DbReport {
    pub fn stopped(host: Option<String>, port: Option<u16>) -> Self {
        Self {
            state: "stopped".to_string(),
            host,
            port,
            is_shared: false,
            shared_with: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodegroupReport {
    pub name: String,
    pub state: String,
    pub status: String,
    pub desired: Option<i32>,
    pub current: Option<i32>,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PodTally {
    pub running: u32,
    pub pending: u32,
    pub crashloop: u32,
    pub total: u32,
    pub running_list: Vec<PodDetail>,
    pub pending_list: Vec<PodDetail>,
    pub crashloop_list: Vec<PodDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PodTally {
    pub fn failed(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Default::default() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PodDetail {
    pub name: String,
    pub phase: String,
    pub reason: Option<String>,
    pub owner: Option<String>,
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,
}

/* ============================= POD CLASSIFICATION ============================= */

const CRASHLOOP_WAITING: [&str; 3] = ["CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull"];
const CRASHLOOP_TERMINATED: [&str; 2] = ["Error", "CrashLoopBackOff"];
const RESTART_THRESHOLD: i32 = 5;

/// Why a pod counts as crash-looping, if it does.
pub fn crashloop_reason(pod: &PodView) -> Option<(String, i32)> {
    for c in &pod.containers {
        if let Some(reason) = &c.waiting_reason
            && CRASHLOOP_WAITING.iter().any(|r| reason.contains(r))
        {
            return Some((reason.clone(), c.restart_count));
        }
        if let Some(reason) = &c.terminated_reason
            && CRASHLOOP_TERMINATED.contains(&reason.as_str())
        {
            return Some((reason.clone(), c.restart_count));
        }
    }
    for c in &pod.containers {
        if c.restart_count > RESTART_THRESHOLD {
            return Some((format!("high restart count: {}", c.restart_count), c.restart_count));
        }
    }
    for reason in &pod.init_waiting_reasons {
        if reason.contains("CrashLoopBackOff") || reason.contains("ImagePullBackOff") {
            return Some((reason.clone(), 0));
        }
    }
    None
}

/// Classify every pod in a namespace. A crash-looping pod still counts in
/// the phase tallies; the crashloop list is an overlay, not a partition.
pub fn tally_pods(pods: &[PodView]) -> PodTally {
    let mut tally = PodTally { total: pods.len() as u32, ..Default::default() };

    for pod in pods {
        let detail = PodDetail {
            name: pod.name.clone(),
            phase: pod.phase.clone(),
            reason: None,
            owner: pod.owner.clone(),
            created: pod.created.clone(),
            restart_count: None,
        };

        match pod.phase.as_str() {
            "Running" => {
                tally.running += 1;
                tally.running_list.push(detail.clone());
            }
            "Pending" => {
                tally.pending += 1;
                let mut detail = detail.clone();
                detail.reason = pod.containers.iter().find_map(|c| c.waiting_reason.clone());
                tally.pending_list.push(detail);
            }
            _ => {}
        }

        if let Some((reason, restarts)) = crashloop_reason(pod) {
            tally.crashloop += 1;
            tally.crashloop_list.push(PodDetail {
                reason: Some(reason),
                restart_count: Some(restarts),
                ..detail
            });
        }
    }

    tally
}

/* ============================= NODEGROUP STATE ============================= */

pub fn nodegroup_state_label(status: NgStatus, desired: i32) -> &'static str {
    if desired == 0 {
        "stopped"
    } else if status == NgStatus::Active {
        "ready"
    } else {
        "scaling"
    }
}

/* ============================= AGGREGATION ============================= */

/// Compute the live composite status for one application, or `None` when it
/// is not registered.
///
/// The four probe families run concurrently under independent deadlines; a
/// failed probe degrades to its safe default and never fails the request.
pub async fn aggregate(rt: &Runtime, app_name: &str) -> Result<Option<CompositeStatus>, CloudError> {
    let Some(record) = rt.registry.get(app_name).await? else {
        return Ok(None);
    };

    let namespace = rt.settings.namespace_for(app_name, record.namespace.as_deref());
    let primary = record.primary_hostname().map(str::to_string);

    let (postgres, neo4j, http, pods) = tokio::join!(
        tokio::time::timeout(
            DB_PROBE_DEADLINE,
            db_report(rt, app_name, record.postgres_host.clone(), record.postgres_port, DbKind::Postgres),
        ),
        tokio::time::timeout(
            DB_PROBE_DEADLINE,
            db_report(rt, app_name, record.neo4j_host.clone(), record.neo4j_port, DbKind::Neo4j),
        ),
        tokio::time::timeout(HTTP_PROBE_DEADLINE, http_report(rt, primary.clone())),
        tokio::time::timeout(PODS_PROBE_DEADLINE, pod_report(rt, namespace.clone())),
    );

    let postgres =
        postgres.unwrap_or_else(|_| DbReport::stopped(record.postgres_host.clone(), record.postgres_port));
    let neo4j =
        neo4j.unwrap_or_else(|_| DbReport::stopped(record.neo4j_host.clone(), record.neo4j_port));
    let http = http.unwrap_or_else(|_| HttpReport::down());
    let pods = pods.unwrap_or_else(|_| PodTally::failed("pod probe timed out"));

    let nodegroups = nodegroup_reports(rt, app_name).await;

    Ok(Some(CompositeStatus {
        name: app_name.to_string(),
        status: http.status.clone(),
        hostname: primary,
        hostnames: record.hostnames.clone(),
        namespace,
        http,
        postgres,
        neo4j,
        nodegroups,
        pods,
        last_checked: "live".to_string(),
    }))
}

async fn db_report(
    rt: &Runtime,
    app_name: &str,
    host: Option<String>,
    port: Option<u16>,
    kind: DbKind,
) -> DbReport {
    let Some(host) = host else {
        return DbReport::stopped(None, port);
    };

    // The backing VM's compute state is the only input to the DB verdict.
    let state = match rt.compute.find_vm_by_private_ip(&host).await {
        Ok(Some(vm)) if vm.state.is_running() => "running",
        Ok(_) => "stopped",
        Err(e) => {
            warn!(host = %host, kind = kind.as_str(), error = %e, "db_vm_lookup_failed");
            "stopped"
        }
    };

    let shared_with = sharing::find_cotenants(rt.registry.as_ref(), &host, kind, app_name)
        .await
        .unwrap_or_default();

    DbReport {
        state: state.to_string(),
        host: Some(host),
        port,
        is_shared: !shared_with.is_empty(),
        shared_with,
    }
}

async fn http_report(rt: &Runtime, hostname: Option<String>) -> HttpReport {
    let Some(hostname) = hostname else {
        return HttpReport::down();
    };
    let outcome = rt.prober.head_probe(&hostname, HTTP_ATTEMPT_TIMEOUT).await;
    HttpReport {
        status: if outcome.verdict == HttpVerdict::Up { "UP" } else { "DOWN" }.to_string(),
        code: outcome.code,
        latency_ms: outcome.latency_ms,
    }
}

async fn pod_report(rt: &Runtime, namespace: String) -> PodTally {
    match rt.workloads.list_pods(&namespace).await {
        Ok(pods) => tally_pods(&pods),
        Err(CloudError::Unauthorized(message)) => {
            warn!(namespace = %namespace, "pod_listing_forbidden");
            PodTally::failed(format!("RBAC permission denied: {message}"))
        }
        Err(e) => PodTally::failed(format!("pod probe failed: {e}")),
    }
}

async fn nodegroup_reports(rt: &Runtime, app_name: &str) -> Vec<NodegroupReport> {
    let Some(assignment) = rt.settings.assignment_for(app_name) else {
        return Vec::new();
    };

    match rt.nodegroups.describe(&assignment.nodegroup).await {
        Ok(view) => vec![NodegroupReport {
            name: view.name.clone(),
            state: nodegroup_state_label(view.status, view.desired).to_string(),
            status: view.status.as_str().to_string(),
            desired: Some(view.desired),
            current: Some(view.desired),
            min: Some(view.min),
            max: Some(view.max),
        }],
        Err(CloudError::NotFound(_)) => vec![NodegroupReport {
            name: assignment.nodegroup.clone(),
            state: "unknown".to_string(),
            status: "NOT_FOUND".to_string(),
            desired: None,
            current: None,
            min: None,
            max: None,
        }],
        Err(e) => {
            debug!(nodegroup = %assignment.nodegroup, error = %e, "nodegroup_describe_failed");
            vec![NodegroupReport {
                name: assignment.nodegroup.clone(),
                state: "unknown".to_string(),
                status: "UNKNOWN".to_string(),
                desired: None,
                current: None,
                min: None,
                max: None,
            }]
        }
    }
}

/* ============================= QUICK STATUS ============================= */

#[derive(Debug, Clone, Serialize)]
pub struct QuickReport {
    pub app: String,
    pub status: String,
    pub http_code: Option<u16>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// 3-second HTTP-only status. UNKNOWN means the probe could not produce a
/// definitive answer; the scheduler treats that as UP.
pub async fn quick_status(rt: &Runtime, app_name: &str) -> QuickReport {
    let record = match rt.registry.get(app_name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return QuickReport {
                app: app_name.to_string(),
                status: "UNKNOWN".to_string(),
                http_code: None,
                timestamp: utc_timestamp(),
                reason: Some("application not found in registry".to_string()),
            };
        }
        Err(e) => {
            return QuickReport {
                app: app_name.to_string(),
                status: "UNKNOWN".to_string(),
                http_code: None,
                timestamp: utc_timestamp(),
                reason: Some(format!("registry read failed: {e}")),
            };
        }
    };

    let Some(hostname) = record.primary_hostname() else {
        return QuickReport {
            app: app_name.to_string(),
            status: "UNKNOWN".to_string(),
            http_code: None,
            timestamp: utc_timestamp(),
            reason: Some("no hostname configured".to_string()),
        };
    };

    let outcome = rt.prober.quick_probe(hostname).await;
    QuickReport {
        app: app_name.to_string(),
        status: outcome.verdict.as_str().to_string(),
        http_code: outcome.code,
        timestamp: utc_timestamp(),
        reason: None,
    }
}

/* ============================= FLEET ============================= */

/// Aggregate every registered application, at most ten in flight, with a
/// 60-second deadline per application. A failed application degrades to a
/// DOWN placeholder instead of failing the fleet view.
pub async fn aggregate_all(rt: &Runtime) -> Result<Vec<CompositeStatus>, CloudError> {
    let names: Vec<String> = rt.registry.scan().await?.into_iter().map(|r| r.app_name).collect();

    let statuses = futures::stream::iter(names.into_iter().map(|name| {
        let rt = rt.clone();
        async move {
            match tokio::time::timeout(PER_APP_DEADLINE, aggregate(&rt, &name)).await {
                Ok(Ok(Some(status))) => status,
                Ok(Ok(None)) => CompositeStatus::failed(&name, "application vanished from registry"),
                Ok(Err(e)) => CompositeStatus::failed(&name, &format!("status check failed: {e}")),
                Err(_) => CompositeStatus::failed(&name, "status aggregation timed out"),
            }
        }
    }))
    .buffer_unordered(FLEET_PARALLELISM)
    .collect::<Vec<_>>()
    .await;

    Ok(statuses)
}

/* ============================= TESTS ============================= */
