use serde::Serialize;
use tracing::{info, warn};

use crate::cloud::nodegroups::ScalingTarget;
use crate::cloud::workloads::{WorkloadKind, DRAIN_DEADLINE};
use crate::error::CloudError;
use crate::registry::HintField;
use crate::runtime::Runtime;
use crate::sharing::{self, DbKind, ShareVerdict};

/* ============================= OUTCOME ============================= */

#[derive(Debug, Clone, Serialize)]
pub struct DbStopReport {
    pub host: String,
    pub status: String,
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of one stop orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub app_name: String,
    pub namespace: String,
    pub workloads_scaled: Vec<String>,
    pub pods_terminated: bool,
    pub nodegroups: Vec<String>,
    pub postgres: Vec<DbStopReport>,
    pub neo4j: Vec<DbStopReport>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl StopOutcome {
    fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            namespace: String::new(),
            workloads_scaled: Vec::new(),
            pods_terminated: false,
            nodegroups: Vec::new(),
            postgres: Vec::new(),
            neo4j: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            success: false,
        }
    }

    fn fail(app_name: &str, error: String) -> Self {
        let mut outcome = Self::new(app_name);
        outcome.errors.push(error);
        outcome
    }
}

/* ============================= ORCHESTRATION ============================= */

/// Drive an application to the DOWN state: workloads to zero, drain,
/// nodegroup to zero, then stop the database VMs that no live co-tenant
/// still needs.
///
/// The shared-database interlock is enforced here with a live read at
/// decision time: a database whose resolver reports `in_use` is never
/// stopped, and resolver failure is treated the same way.
pub async fn stop_application(rt: &Runtime, app_name: &str) -> StopOutcome {
    info!(app = app_name, "stop_orchestration_begin");

    let record = match rt.registry.get(app_name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return StopOutcome::fail(app_name, format!("application {app_name} not found in registry"));
        }
        Err(e) => return StopOutcome::fail(app_name, format!("registry read failed: {e}")),
    };

    let mut outcome = StopOutcome::new(app_name);
    outcome.namespace = rt.settings.namespace_for(app_name, record.namespace.as_deref());
    let namespace = outcome.namespace.clone();

    // T1: all Deployments and StatefulSets to zero.
    match rt.workloads.list_workloads(&namespace).await {
        Err(e) => outcome.errors.push(format!("failed to list workloads in {namespace}: {e}")),
        Ok(workloads) => {
            for workload in workloads {
                if !matches!(workload.kind, WorkloadKind::Deployment | WorkloadKind::StatefulSet) {
                    continue;
                }
                if workload.replicas == 0 {
                    continue;
                }
                match rt.workloads.scale_workload(workload.kind, &namespace, &workload.name, 0).await {
                    Ok(()) => outcome
                        .workloads_scaled
                        .push(format!("{}/{}", workload.kind.as_str(), workload.name)),
                    Err(e) => outcome.errors.push(format!(
                        "failed to scale {} {} to zero: {e}",
                        workload.kind.as_str(),
                        workload.name
                    )),
                }
            }
        }
    }

    // T2: drain. A timeout is a warning, not a blocker.
    match rt.workloads.wait_pods_terminated(&namespace, DRAIN_DEADLINE).await {
        Ok(true) => outcome.pods_terminated = true,
        Ok(false) => {
            outcome.warnings.push("some pods may not have terminated gracefully".to_string());
        }
        Err(e) => outcome.warnings.push(format!("could not verify pod termination: {e}")),
    }

    // T3: nodegroup to zero, preserving the live max.
    if let Some(assignment) = rt.settings.assignment_for(app_name) {
        let (current_desired, current_min, current_max) =
            match rt.nodegroups.describe(&assignment.nodegroup).await {
                Ok(view) => (Some(view.desired), Some(view.min), view.max),
                Err(CloudError::NotFound(_)) => {
                    outcome
                        .warnings
                        .push(format!("nodegroup {} does not exist; nothing to scale down", assignment.nodegroup));
                    (None, None, assignment.max)
                }
                Err(e) => {
                    outcome
                        .warnings
                        .push(format!("could not read nodegroup {}: {e}", assignment.nodegroup));
                    (Some(-1), Some(-1), assignment.max)
                }
            };

        let already_zero = current_desired == Some(0) && current_min == Some(0);
        if current_desired.is_some() && !already_zero {
            let target = ScalingTarget { desired: 0, min: 0, max: current_max };
            match rt.nodegroups.update_scaling(&assignment.nodegroup, target).await {
                Ok(()) => outcome.nodegroups.push(assignment.nodegroup.clone()),
                Err(e) => outcome
                    .errors
                    .push(format!("failed to scale down nodegroup {}: {e}", assignment.nodegroup)),
            }
        }
        write_hint(rt, app_name, HintField::NodegroupState, "stopped", &mut outcome.warnings).await;
    }

    // T4: stop database VMs, consulting the share resolver first.
    let databases = [
        (DbKind::Postgres, HintField::PostgresState, record.postgres_host.clone()),
        (DbKind::Neo4j, HintField::Neo4jState, record.neo4j_host.clone()),
    ];

    for (kind, hint, host) in databases {
        let Some(host) = host else { continue };

        let verdict = match sharing::resolve(rt, &host, kind, app_name).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // Cannot tell who else uses the database: leave it running.
                outcome.warnings.push(format!(
                    "could not determine who shares {} {host}; database left running: {e}",
                    kind.as_str()
                ));
                continue;
            }
        };

        let (shared, reason) = match verdict {
            ShareVerdict::Shared { cotenants, in_use: true } => {
                outcome.warnings.push(format!(
                    "{} {host} is shared with {} - database not stopped",
                    kind.as_str(),
                    cotenants.join(", ")
                ));
                continue;
            }
            ShareVerdict::Shared { in_use: false, .. } => {
                (true, Some("no live application is using the shared database".to_string()))
            }
            ShareVerdict::Exclusive => (false, None),
        };

        let stopped = stop_db_vm(rt, kind, &host, shared, reason, &mut outcome).await;
        if stopped {
            write_hint(rt, app_name, hint, "stopped", &mut outcome.warnings).await;
        }
    }

    write_hint(rt, app_name, HintField::Status, "DOWN", &mut outcome.warnings).await;

    outcome.success = outcome.errors.is_empty();
    info!(app = app_name, success = outcome.success, "stop_orchestration_complete");
    outcome
}

async fn stop_db_vm(
    rt: &Runtime,
    kind: DbKind,
    host: &str,
    shared: bool,
    reason: Option<String>,
    outcome: &mut StopOutcome,
) -> bool {
    let vm = match rt.compute.find_vm_by_private_ip(host).await {
        Ok(Some(vm)) => vm,
        Ok(None) => {
            outcome.warnings.push(format!("no vm found for {} host {host}", kind.as_str()));
            return false;
        }
        Err(e) => {
            outcome.errors.push(format!("failed to look up {} host {host}: {e}", kind.as_str()));
            return false;
        }
    };

    if !vm.state.is_running() {
        info!(host, vm = %vm.id, state = vm.state.as_str(), "db_vm_not_running_skipping_stop");
        return false;
    }

    match rt.compute.stop_vm(&vm.id).await {
        Ok(()) => {
            let report = DbStopReport {
                host: host.to_string(),
                status: "stopping".to_string(),
                shared,
                reason,
            };
            match kind {
                DbKind::Postgres => outcome.postgres.push(report),
                DbKind::Neo4j => outcome.neo4j.push(report),
            }
            true
        }
        Err(e) => {
            outcome.errors.push(format!("failed to stop {} {host}: {e}", kind.as_str()));
            false
        }
    }
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

/* ============================= TESTS ============================= */
