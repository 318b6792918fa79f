use fleet_controller::cloud::workloads::{ContainerView, PodView};
use fleet_controller::registry::AppRecord;

pub fn make_pod_view(
    name: &str,
    phase: &str,
    restart_count: i32,
    ready: bool,
    waiting_reason: Option<&str>,
) -> PodView {
    PodView {
        name: name.to_string(),
        phase: phase.to_string(),
        owner: Some(format!("replicaset/{name}-rs")),
        created: Some("2026-01-05T03:30:00+00:00".to_string()),
        containers: vec![ContainerView {
            restart_count,
            ready,
            waiting_reason: waiting_reason.map(str::to_string),
            terminated_reason: None,
        }],
        init_waiting_reasons: Vec::new(),
    }
}

pub fn make_record(name: &str, hostnames: &[&str]) -> AppRecord {
    AppRecord {
        app_name: name.to_string(),
        namespace: Some("svc".to_string()),
        hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
        postgres_host: Some("10.0.1.20".to_string()),
        postgres_port: Some(5432),
        postgres_db: Some("app".to_string()),
        postgres_user: Some("app_rw".to_string()),
        neo4j_host: None,
        neo4j_port: None,
        neo4j_username: None,
        status: Some("UP".to_string()),
        postgres_state: Some("running".to_string()),
        neo4j_state: None,
        nodegroup_state: Some("ready".to_string()),
    }
}
