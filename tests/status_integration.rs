mod common;

use common::make_pod_view;
use fleet_controller::cloud::nodegroups::NgStatus;
use fleet_controller::status::{crashloop_reason, nodegroup_state_label, tally_pods};

#[test]
fn test_healthy_namespace_tally() {
    let pods = vec![
        make_pod_view("web-0", "Running", 0, true, None),
        make_pod_view("web-1", "Running", 1, true, None),
        make_pod_view("worker-0", "Running", 0, true, None),
    ];
    let tally = tally_pods(&pods);
    assert_eq!(tally.running, 3);
    assert_eq!(tally.pending, 0);
    assert_eq!(tally.crashloop, 0);
    assert_eq!(tally.total, 3);
    assert!(tally.error.is_none());
}

#[test]
fn test_mixed_namespace_tally() {
    let pods = vec![
        make_pod_view("web-0", "Running", 0, true, None),
        make_pod_view("web-1", "Pending", 0, false, Some("ContainerCreating")),
        make_pod_view("broken-0", "Running", 0, false, Some("CrashLoopBackOff")),
    ];
    let tally = tally_pods(&pods);
    assert_eq!(tally.running, 2);
    assert_eq!(tally.pending, 1);
    assert_eq!(tally.crashloop, 1);
    assert_eq!(tally.crashloop_list[0].name, "broken-0");
    assert_eq!(tally.crashloop_list[0].reason.as_deref(), Some("CrashLoopBackOff"));
}

#[test]
fn test_image_pull_failures_count_as_crashloop() {
    for reason in ["ImagePullBackOff", "ErrImagePull"] {
        let pod = make_pod_view("p", "Pending", 0, false, Some(reason));
        assert!(crashloop_reason(&pod).is_some(), "{reason} should flag the pod");
    }
}

#[test]
fn test_restart_count_threshold_is_strict() {
    let at_threshold = make_pod_view("p", "Running", 5, true, None);
    assert!(crashloop_reason(&at_threshold).is_none());

    let over_threshold = make_pod_view("p", "Running", 6, true, None);
    let (reason, restarts) = crashloop_reason(&over_threshold).unwrap();
    assert!(reason.contains("6"));
    assert_eq!(restarts, 6);
}

#[test]
fn test_container_creating_is_pending_not_crashloop() {
    let pod = make_pod_view("p", "Pending", 0, false, Some("ContainerCreating"));
    assert!(crashloop_reason(&pod).is_none());
    let tally = tally_pods(&[pod]);
    assert_eq!(tally.pending, 1);
    assert_eq!(tally.crashloop, 0);
}

#[test]
fn test_nodegroup_state_mapping() {
    assert_eq!(nodegroup_state_label(NgStatus::Active, 3), "ready");
    assert_eq!(nodegroup_state_label(NgStatus::Active, 0), "stopped");
    assert_eq!(nodegroup_state_label(NgStatus::Updating, 0), "stopped");
    assert_eq!(nodegroup_state_label(NgStatus::Updating, 2), "scaling");
    assert_eq!(nodegroup_state_label(NgStatus::Degraded, 1), "scaling");
}
