use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cloud::compute::VmState;
use crate::cloud::nodegroups::ScalingTarget;
use crate::cloud::probes::TcpVerdict;
use crate::cloud::workloads::WorkloadKind;
use crate::error::CloudError;
use crate::registry::HintField;
use crate::runtime::Runtime;
use crate::sharing::DbKind;

/* ============================= OUTCOME ============================= */

pub const WORKLOAD_READY_DEADLINE: Duration = Duration::from_secs(300);
const WORKLOAD_READY_POLL: Duration = Duration::from_secs(5);
const DB_PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    Pending,
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartDetails {
    pub db_start: PhaseOutcome,
    pub nodegroup_start: PhaseOutcome,
    pub pods_scale: PhaseOutcome,
}

/// Result of one start orchestration. `success` holds iff no phase pushed
/// an error; warnings never fail the run.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub app: String,
    pub status: String,
    pub details: StartDetails,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl StartOutcome {
    fn new(app: &str) -> Self {
        Self {
            app: app.to_string(),
            status: "starting".to_string(),
            details: StartDetails {
                db_start: PhaseOutcome::Pending,
                nodegroup_start: PhaseOutcome::Pending,
                pods_scale: PhaseOutcome::Pending,
            },
            warnings: Vec::new(),
            errors: Vec::new(),
            success: false,
        }
    }

    fn fail(app: &str, error: String) -> Self {
        let mut outcome = Self::new(app);
        outcome.status = "failed".to_string();
        outcome.errors.push(error);
        outcome
    }
}

/* ============================= ORCHESTRATION ============================= */

/// Drive an application to the UP state:
/// detect database VMs, start the stopped ones, scale the assigned
/// nodegroup to its configured targets, wait for it to settle, then scale
/// the namespace workloads up without ever lowering a replica count.
///
/// Phases are idempotent: a component already at target is skipped without
/// a mutating call (its hint is still healed).
pub async fn start_application(rt: &Runtime, app_name: &str) -> StartOutcome {
    info!(app = app_name, "start_orchestration_begin");

    let record = match rt.registry.get(app_name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return StartOutcome::fail(app_name, format!("application {app_name} not found in registry"));
        }
        Err(e) => return StartOutcome::fail(app_name, format!("registry read failed: {e}")),
    };

    let namespace = rt.settings.namespace_for(app_name, record.namespace.as_deref());
    let mut outcome = StartOutcome::new(app_name);

    // S1 + S2: detect database VMs and start the stopped ones.
    let mut db_started = false;
    let databases = [
        (DbKind::Postgres, HintField::PostgresState, record.postgres_host.clone(), record.postgres_port),
        (DbKind::Neo4j, HintField::Neo4jState, record.neo4j_host.clone(), record.neo4j_port),
    ];

    for (kind, hint, host, port) in databases {
        let Some(host) = host else { continue };
        match rt.compute.find_vm_by_private_ip(&host).await {
            Ok(Some(vm)) if vm.state.is_running() => {
                info!(app = app_name, kind = kind.as_str(), vm = %vm.id, "db_vm_already_running");
                write_hint(rt, app_name, hint, "running", &mut outcome.warnings).await;
            }
            Ok(Some(vm)) => {
                write_hint(rt, app_name, hint, "starting", &mut outcome.warnings).await;
                match rt.compute.start_vm(&vm.id).await {
                    Ok(VmState::Running) => {
                        db_started = true;
                        write_hint(rt, app_name, hint, "running", &mut outcome.warnings).await;
                        if let Some(port) = port
                            && rt.prober.tcp_probe(&host, port, DB_PORT_PROBE_TIMEOUT).await
                                != TcpVerdict::Open
                        {
                            outcome.warnings.push(format!(
                                "{} {host}:{port} is not accepting connections yet",
                                kind.as_str()
                            ));
                        }
                    }
                    Ok(state) => {
                        outcome.errors.push(format!(
                            "{} vm {} failed to start (last state: {})",
                            kind.as_str(),
                            vm.id,
                            state.as_str()
                        ));
                    }
                    Err(e) => {
                        outcome.errors.push(format!("failed to start {} vm {}: {e}", kind.as_str(), vm.id));
                    }
                }
            }
            Ok(None) => {
                outcome.warnings.push(format!("no vm found for {} host {host}", kind.as_str()));
            }
            Err(e) => {
                outcome
                    .errors
                    .push(format!("failed to look up {} host {host}: {e}", kind.as_str()));
            }
        }
    }
    outcome.details.db_start = if db_started { PhaseOutcome::Done } else { PhaseOutcome::Skipped };

    // S3: scale the assigned nodegroup to its configured targets.
    let assignment = rt.settings.assignment_for(app_name).cloned();
    let mut nodegroup_acted = false;

    match &assignment {
        None => {
            info!(app = app_name, "no_nodegroup_assigned");
            outcome.details.nodegroup_start = PhaseOutcome::Skipped;
        }
        Some(assignment) => match rt.nodegroups.describe(&assignment.nodegroup).await {
            Ok(view)
                if view.desired == assignment.desired
                    && view.min == assignment.min
                    && view.max == assignment.max =>
            {
                info!(app = app_name, nodegroup = %assignment.nodegroup, "nodegroup_already_at_target");
                outcome.details.nodegroup_start = PhaseOutcome::Skipped;
            }
            Ok(_) => {
                write_hint(rt, app_name, HintField::NodegroupState, "scaling", &mut outcome.warnings).await;
                let target = ScalingTarget {
                    desired: assignment.desired,
                    min: assignment.min,
                    max: assignment.max,
                };
                match rt.nodegroups.update_scaling(&assignment.nodegroup, target).await {
                    Ok(()) => {
                        nodegroup_acted = true;
                        outcome.details.nodegroup_start = PhaseOutcome::Done;
                    }
                    Err(e) => {
                        outcome.errors.push(format!("failed to scale nodegroup {}: {e}", assignment.nodegroup));
                        outcome.details.nodegroup_start = PhaseOutcome::Failed;
                    }
                }
            }
            // A configured but missing nodegroup degrades to pods-only start.
            Err(CloudError::NotFound(_)) => {
                outcome.warnings.push(format!(
                    "nodegroup {} does not exist in cluster {}; starting without nodegroup scaling",
                    assignment.nodegroup, rt.settings.cluster_name
                ));
                outcome.details.nodegroup_start = PhaseOutcome::Skipped;
            }
            Err(e) => {
                outcome.errors.push(format!("failed to describe nodegroup {}: {e}", assignment.nodegroup));
                outcome.details.nodegroup_start = PhaseOutcome::Failed;
            }
        },
    }

    // S4: wait for the nodegroup to settle, only when S3 acted. Not a
    // precondition for S5; a timeout degrades to a warning.
    if nodegroup_acted
        && let Some(assignment) = &assignment
    {
        match rt.nodegroups.wait_active(&assignment.nodegroup, assignment.desired).await {
            Ok(()) => {
                write_hint(rt, app_name, HintField::NodegroupState, "ready", &mut outcome.warnings).await;
            }
            Err(e) if e.is_transient() => {
                outcome.warnings.push(format!("nodegroup {}: {e}", assignment.nodegroup));
            }
            Err(e) => {
                outcome.errors.push(format!("nodegroup {}: {e}", assignment.nodegroup));
            }
        }
    }

    // S5: scale workloads up. Replica floor is max(1, current): never scale
    // a workload down on start, never invent a higher count than the
    // operator last set.
    match rt.workloads.list_workloads(&namespace).await {
        Err(e) => {
            outcome.errors.push(format!("failed to list workloads in {namespace}: {e}"));
            outcome.details.pods_scale = PhaseOutcome::Failed;
        }
        Ok(workloads) => {
            let mut scaled = 0u32;
            let mut daemonsets = Vec::new();

            for workload in &workloads {
                match workload.kind {
                    WorkloadKind::Deployment | WorkloadKind::StatefulSet => {
                        let target = workload.replicas.max(1);
                        if workload.replicas == target {
                            continue;
                        }
                        match rt
                            .workloads
                            .scale_workload(workload.kind, &namespace, &workload.name, target)
                            .await
                        {
                            Ok(()) => scaled += 1,
                            Err(e) => outcome.warnings.push(format!(
                                "failed to scale {} {}: {e}",
                                workload.kind.as_str(),
                                workload.name
                            )),
                        }
                    }
                    // Standalone replica sets are scaled; owned ones belong
                    // to their deployment.
                    WorkloadKind::ReplicaSet if !workload.owned => {
                        let target = workload.replicas.max(1);
                        if workload.replicas == target {
                            continue;
                        }
                        match rt
                            .workloads
                            .scale_workload(WorkloadKind::ReplicaSet, &namespace, &workload.name, target)
                            .await
                        {
                            Ok(()) => scaled += 1,
                            Err(e) => outcome
                                .warnings
                                .push(format!("failed to scale replicaset {}: {e}", workload.name)),
                        }
                    }
                    WorkloadKind::ReplicaSet => {}
                    WorkloadKind::DaemonSet => daemonsets.push(workload.name.clone()),
                }
            }

            if scaled > 0 {
                for name in daemonsets {
                    if let Err(e) = rt.workloads.restart_daemonset(&namespace, &name).await {
                        outcome.warnings.push(format!("failed to restart daemonset {name}: {e}"));
                    }
                }
                outcome.details.pods_scale = PhaseOutcome::Done;
                if !wait_workloads_ready(rt, &namespace).await {
                    outcome.warnings.push(format!("timeout waiting for pods to be ready in {namespace}"));
                }
            } else {
                info!(app = app_name, namespace = %namespace, "workloads_already_at_target");
                outcome.details.pods_scale = PhaseOutcome::Skipped;
            }
        }
    }

    outcome.success = outcome.errors.is_empty();
    outcome.status = if outcome.success { "started" } else { "failed" }.to_string();
    info!(app = app_name, success = outcome.success, "start_orchestration_complete");
    outcome
}

async fn write_hint(
    rt: &Runtime,
    app_name: &str,
    field: HintField,
    value: &str,
    warnings: &mut Vec<String>,
) {
    if let Err(e) = rt.registry.set_hint(app_name, field, value).await {
        warn!(app = app_name, field = field.attribute_name(), error = %e, "hint_write_failed");
        warnings.push(format!("failed to record {} = {value}: {e}", field.attribute_name()));
    }
}

async fn wait_workloads_ready(rt: &Runtime, namespace: &str) -> bool {
    let deadline = tokio::time::Instant::now() + WORKLOAD_READY_DEADLINE;
    loop {
        match rt.workloads.list_pods(namespace).await {
            Ok(pods) => {
                let total = pods.len();
                let ready = pods
                    .iter()
                    .filter(|p| p.phase == "Running" && p.all_containers_ready())
                    .count();
                if total > 0 && ready == total {
                    return true;
                }
            }
            Err(e) => {
                warn!(namespace, error = %e, "pod_readiness_check_failed");
                return false;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(WORKLOAD_READY_POLL).await;
    }
}

/* ============================= DRY RUN ============================= */

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannedAction {
    StartVm {
        resource: String,
        instance_id: String,
        host: String,
        current_state: String,
        target_state: String,
    },
    ScaleNodegroup {
        nodegroup: String,
        current_desired: i32,
        current_min: i32,
        current_max: i32,
        target_desired: i32,
        target_min: i32,
        target_max: i32,
    },
    ScaleWorkload {
        kind: String,
        name: String,
        namespace: String,
        current_replicas: i32,
        target_replicas: i32,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewSummary {
    pub vms_to_start: u32,
    pub nodegroups_to_scale: u32,
    pub deployments_to_scale: u32,
    pub statefulsets_to_scale: u32,
    pub warnings: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartPreview {
    pub dry_run: bool,
    pub app_name: String,
    pub namespace: String,
    pub actions: Vec<PlannedAction>,
    pub warnings: Vec<String>,
    pub summary: PreviewSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Enumerate the actions a start would take, without mutating anything.
pub async fn build_start_preview(rt: &Runtime, app_name: &str) -> StartPreview {
    let mut preview = StartPreview {
        dry_run: true,
        app_name: app_name.to_string(),
        namespace: String::new(),
        actions: Vec::new(),
        warnings: Vec::new(),
        summary: PreviewSummary::default(),
        error: None,
    };

    let record = match rt.registry.get(app_name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            preview.error = Some(format!("application {app_name} not found in registry"));
            return preview;
        }
        Err(e) => {
            preview.error = Some(format!("registry read failed: {e}"));
            return preview;
        }
    };
    preview.namespace = rt.settings.namespace_for(app_name, record.namespace.as_deref());

    for (kind, host) in [
        (DbKind::Postgres, record.postgres_host.clone()),
        (DbKind::Neo4j, record.neo4j_host.clone()),
    ] {
        let Some(host) = host else { continue };
        match rt.compute.find_vm_by_private_ip(&host).await {
            Ok(Some(vm)) if !vm.state.is_running() => {
                preview.actions.push(PlannedAction::StartVm {
                    resource: kind.as_str().to_string(),
                    instance_id: vm.id,
                    host,
                    current_state: vm.state.as_str().to_string(),
                    target_state: "running".to_string(),
                });
                preview.summary.vms_to_start += 1;
            }
            Ok(Some(_)) => {}
            Ok(None) => preview.warnings.push(format!("no vm found for {} host {host}", kind.as_str())),
            Err(e) => preview.warnings.push(format!("could not check {} host {host}: {e}", kind.as_str())),
        }
    }

    if let Some(assignment) = rt.settings.assignment_for(app_name) {
        match rt.nodegroups.describe(&assignment.nodegroup).await {
            Ok(view) => {
                if view.desired != assignment.desired
                    || view.min != assignment.min
                    || view.max != assignment.max
                {
                    preview.actions.push(PlannedAction::ScaleNodegroup {
                        nodegroup: assignment.nodegroup.clone(),
                        current_desired: view.desired,
                        current_min: view.min,
                        current_max: view.max,
                        target_desired: assignment.desired,
                        target_min: assignment.min,
                        target_max: assignment.max,
                    });
                    preview.summary.nodegroups_to_scale += 1;
                }
            }
            Err(e) => {
                preview
                    .warnings
                    .push(format!("could not check nodegroup {}: {e}", assignment.nodegroup));
            }
        }
    }

    match rt.workloads.list_workloads(&preview.namespace).await {
        Ok(workloads) => {
            for workload in workloads {
                let scalable =
                    matches!(workload.kind, WorkloadKind::Deployment | WorkloadKind::StatefulSet);
                if !scalable {
                    continue;
                }
                let target = workload.replicas.max(1);
                if workload.replicas == target {
                    continue;
                }
                match workload.kind {
                    WorkloadKind::Deployment => preview.summary.deployments_to_scale += 1,
                    WorkloadKind::StatefulSet => preview.summary.statefulsets_to_scale += 1,
                    _ => {}
                }
                preview.actions.push(PlannedAction::ScaleWorkload {
                    kind: workload.kind.as_str().to_string(),
                    name: workload.name,
                    namespace: preview.namespace.clone(),
                    current_replicas: workload.replicas,
                    target_replicas: target,
                });
            }
        }
        Err(e) => preview.warnings.push(format!("could not check workloads: {e}")),
    }

    preview.summary.warnings = preview.warnings.len() as u32;
    preview
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::nodegroups::NgStatus;
    use crate::testsupport::{nodegroup, record_with_db, runtime_with, TestFixture};

    fn cold_fixture() -> TestFixture {
        let mut fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", Some("10.0.1.20"), None));
        fixture.compute.add_vm("10.0.1.20", "i-pg", crate::cloud::compute::VmState::Stopped);
        fixture.assign_nodegroup("svc.example.com", "ng-a", 2, 1, 4);
        fixture.nodegroups.add(nodegroup("ng-a", NgStatus::Active, 0, 0, 4));
        fixture.workloads.add_workload(WorkloadKind::Deployment, "svc", 0, false);
        fixture
    }

    #[tokio::test]
    async fn test_cold_start_runs_all_phases() {
        let fixture = cold_fixture();
        let rt = runtime_with(&fixture);

        let outcome = start_application(&rt, "svc.example.com").await;
        assert!(outcome.success, "errors: {:?}", outcome.errors);
        assert_eq!(outcome.status, "started");
        assert_eq!(outcome.details.db_start, PhaseOutcome::Done);
        assert_eq!(outcome.details.nodegroup_start, PhaseOutcome::Done);
        assert_eq!(outcome.details.pods_scale, PhaseOutcome::Done);

        // VM running, nodegroup at target, deployment at one replica.
        assert_eq!(fixture.compute.state_of("i-pg"), Some(crate::cloud::compute::VmState::Running));
        let view = fixture.nodegroups.view("ng-a").unwrap();
        assert_eq!((view.desired, view.min, view.max), (2, 1, 4));
        assert_eq!(fixture.workloads.replicas_of("svc"), Some(1));

        // Hints were healed along the way.
        let record = fixture.registry.record("svc.example.com").unwrap();
        assert_eq!(record.postgres_state.as_deref(), Some("running"));
        assert_eq!(record.nodegroup_state.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_cold_start_phase_ordering() {
        let fixture = cold_fixture();
        let rt = runtime_with(&fixture);
        start_application(&rt, "svc.example.com").await;

        let vm = fixture.events.first_index("start_vm:").unwrap();
        let ng = fixture.events.first_index("update_nodegroup:").unwrap();
        let scale = fixture.events.first_index("scale:").unwrap();
        assert!(vm < ng, "vm start must precede nodegroup scaling");
        assert!(ng < scale, "nodegroup scaling must precede workload scaling");
    }

    #[tokio::test]
    async fn test_idempotent_start_makes_no_mutating_calls() {
        let mut fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", Some("10.0.1.20"), None));
        fixture.compute.add_vm("10.0.1.20", "i-pg", crate::cloud::compute::VmState::Running);
        fixture.assign_nodegroup("svc.example.com", "ng-a", 2, 1, 4);
        fixture.nodegroups.add(nodegroup("ng-a", NgStatus::Active, 2, 1, 4));
        fixture.workloads.add_workload(WorkloadKind::Deployment, "svc", 2, false);
        let rt = runtime_with(&fixture);

        let outcome = start_application(&rt, "svc.example.com").await;
        assert!(outcome.success);
        assert_eq!(fixture.cloud_mutations(), 0);
        assert_eq!(outcome.details.db_start, PhaseOutcome::Skipped);
        assert_eq!(outcome.details.nodegroup_start, PhaseOutcome::Skipped);
        assert_eq!(outcome.details.pods_scale, PhaseOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_running_db_hint_is_healed() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", Some("10.0.1.20"), None));
        fixture.compute.add_vm("10.0.1.20", "i-pg", crate::cloud::compute::VmState::Running);
        let rt = runtime_with(&fixture);

        start_application(&rt, "svc.example.com").await;
        let record = fixture.registry.record("svc.example.com").unwrap();
        assert_eq!(record.postgres_state.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_replicas_never_decrease() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", None, None));
        fixture.workloads.add_workload(WorkloadKind::Deployment, "big", 3, false);
        fixture.workloads.add_workload(WorkloadKind::Deployment, "down", 0, false);
        let rt = runtime_with(&fixture);

        let outcome = start_application(&rt, "svc.example.com").await;
        assert!(outcome.success);
        assert_eq!(fixture.workloads.replicas_of("big"), Some(3));
        assert_eq!(fixture.workloads.replicas_of("down"), Some(1));
        // Only the zero-replica workload was touched.
        assert!(fixture.events.first_index("scale:deployment:big").is_none());
    }

    #[tokio::test]
    async fn test_missing_nodegroup_is_warning_not_error() {
        let mut fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", None, None));
        fixture.assign_nodegroup("svc.example.com", "ng-gone", 2, 1, 4);
        fixture.workloads.add_workload(WorkloadKind::Deployment, "svc", 0, false);
        let rt = runtime_with(&fixture);

        let outcome = start_application(&rt, "svc.example.com").await;
        assert!(outcome.success, "errors: {:?}", outcome.errors);
        assert!(outcome.warnings.iter().any(|w| w.contains("ng-gone")));
        assert_eq!(outcome.details.nodegroup_start, PhaseOutcome::Skipped);
        // S5 still ran.
        assert_eq!(fixture.workloads.replicas_of("svc"), Some(1));
    }

    #[tokio::test]
    async fn test_owned_replicasets_skipped_standalone_scaled() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", None, None));
        fixture.workloads.add_workload(WorkloadKind::ReplicaSet, "owned-rs", 0, true);
        fixture.workloads.add_workload(WorkloadKind::ReplicaSet, "standalone-rs", 0, false);
        let rt = runtime_with(&fixture);

        start_application(&rt, "svc.example.com").await;
        assert_eq!(fixture.workloads.replicas_of("owned-rs"), Some(0));
        assert_eq!(fixture.workloads.replicas_of("standalone-rs"), Some(1));
    }

    #[tokio::test]
    async fn test_daemonsets_restarted_when_scaling_up() {
        let fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", None, None));
        fixture.workloads.add_workload(WorkloadKind::Deployment, "svc", 0, false);
        fixture.workloads.add_workload(WorkloadKind::DaemonSet, "agent", 0, false);
        let rt = runtime_with(&fixture);

        start_application(&rt, "svc.example.com").await;
        assert!(fixture.events.first_index("restart_daemonset:agent").is_some());
        // Never scaled.
        assert!(fixture.events.events().iter().all(|e| !e.starts_with("scale:daemonset")));
    }

    #[tokio::test]
    async fn test_unknown_app_fails() {
        let fixture = TestFixture::new();
        let rt = runtime_with(&fixture);
        let outcome = start_application(&rt, "ghost.example.com").await;
        assert!(!outcome.success);
        assert!(outcome.errors[0].contains("not found"));
    }

    // ── dry run ──

    #[tokio::test]
    async fn test_preview_enumerates_actions_without_mutations() {
        let fixture = cold_fixture();
        let rt = runtime_with(&fixture);

        let preview = build_start_preview(&rt, "svc.example.com").await;
        assert!(preview.dry_run);
        assert_eq!(preview.summary.vms_to_start, 1);
        assert_eq!(preview.summary.nodegroups_to_scale, 1);
        assert_eq!(preview.summary.deployments_to_scale, 1);
        assert_eq!(preview.actions.len(), 3);
        assert_eq!(fixture.cloud_mutations(), 0);
    }

    #[tokio::test]
    async fn test_preview_empty_when_everything_at_target() {
        let mut fixture = TestFixture::new();
        fixture.registry.insert(record_with_db("svc.example.com", Some("10.0.1.20"), None));
        fixture.compute.add_vm("10.0.1.20", "i-pg", crate::cloud::compute::VmState::Running);
        fixture.assign_nodegroup("svc.example.com", "ng-a", 2, 1, 4);
        fixture.nodegroups.add(nodegroup("ng-a", NgStatus::Active, 2, 1, 4));
        fixture.workloads.add_workload(WorkloadKind::Deployment, "svc", 1, false);
        let rt = runtime_with(&fixture);

        let preview = build_start_preview(&rt, "svc.example.com").await;
        assert!(preview.actions.is_empty());
        assert_eq!(preview.summary.vms_to_start, 0);
    }

    #[tokio::test]
    async fn test_preview_unknown_app_reports_error() {
        let fixture = TestFixture::new();
        let rt = runtime_with(&fixture);
        let preview = build_start_preview(&rt, "ghost.example.com").await;
        assert!(preview.error.is_some());
    }
}
