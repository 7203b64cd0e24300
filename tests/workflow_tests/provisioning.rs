//! Stories about which nodes get provisioned and how a run ends
//!
//! The ledger decides everything after provisioning: capable nodes lead to
//! a full install and verification, no capable nodes lead to a skip, and a
//! failing probe ends the run after cleaning up what was already done.

use sriov_harness::catalog::DeviceFamily;
use sriov_harness::config::DEBUG_POD_FIXTURE;
use sriov_harness::ledger::ResourceRecord;
use sriov_harness::workflow::{RunOutcome, Workflow, WorkflowState};
use sriov_harness::Error;

use super::fake::FakeCluster;
use super::{config_with, intel_x710, CONFIGURED, FAILED};

fn count_prefixed(actions: &[String], prefix: &str) -> usize {
    actions.iter().filter(|a| a.starts_with(prefix)).count()
}

/// Story: one NIC family is present on two of three workers
///
/// Both capable workers end up in the ledger, the full seven-step stack is
/// installed, each node advertises exactly the VFs that were created, and
/// teardown leaves the cluster as it found it.
#[tokio::test(start_paused = true)]
async fn story_capable_workers_are_provisioned_verified_and_cleaned_up() {
    let device = intel_x710();
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0", "worker-1", "worker-2"])
        .with_device("worker-0", &device, CONFIGURED)
        .with_device("worker-1", &device, CONFIGURED);

    let report = Workflow::new(config_with(vec![device]), cluster.backends())
        .run()
        .await;

    assert!(
        matches!(report.outcome, RunOutcome::Passed),
        "unexpected outcome {:?}",
        report.outcome
    );
    assert_eq!(
        report.records,
        vec![
            ResourceRecord::new("worker-0", "intelx710", 4, DeviceFamily::Netdevice),
            ResourceRecord::new("worker-1", "intelx710", 4, DeviceFamily::Netdevice),
        ]
    );
    assert_eq!(
        report.states,
        vec![
            WorkflowState::Idle,
            WorkflowState::Provisioning,
            WorkflowState::InstallingInfra,
            WorkflowState::Verifying,
            WorkflowState::TearingDown,
            WorkflowState::Done,
        ]
    );

    let completed = &report.teardown.completed;
    assert_eq!(count_prefixed(completed, "uninstall "), 7);
    assert_eq!(count_prefixed(completed, "remove label "), 2);
    assert_eq!(count_prefixed(completed, "delete workload "), 2);
    assert!(report.teardown.is_clean());

    assert!(cluster.created().is_empty(), "left behind: {:?}", cluster.created());
    assert!(cluster.residual_labels().is_empty());
}

/// Story: the workload claiming the VFs sees its secondary interface
#[tokio::test(start_paused = true)]
async fn story_workload_interface_is_inspected_per_record() {
    let device = intel_x710();
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0"])
        .with_device("worker-0", &device, CONFIGURED);

    let report = Workflow::new(config_with(vec![device]), cluster.backends())
        .run()
        .await;

    assert!(matches!(report.outcome, RunOutcome::Passed));
    assert!(cluster
        .journal()
        .contains(&"exec testpod-intelx710 /bin/bash -c ip link show dev net1".to_string()));
}

/// Story: no node carries any catalog device
///
/// Every probe is not-applicable, so the run is a skip rather than a
/// failure, nothing beyond the debug pods is ever created, and there is
/// nothing to tear down.
#[tokio::test(start_paused = true)]
async fn story_no_capable_hardware_is_a_skip() {
    let cluster = FakeCluster::new().with_workers(&["worker-0", "worker-1"]);

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    assert!(matches!(report.outcome, RunOutcome::Skipped(_)));
    assert!(!report.outcome.is_failure());
    assert!(report.records.is_empty());
    assert_eq!(report.teardown.executed(), 0);
    assert!(!report.states.contains(&WorkflowState::InstallingInfra));
    assert!(!report.states.contains(&WorkflowState::Verifying));

    let applied = cluster.applied_files();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|f| f == DEBUG_POD_FIXTURE));
    assert!(cluster.residual_labels().is_empty());
}

/// Story: provisioning fails on the second worker
///
/// The run stops right there: the third worker is never touched, nothing is
/// installed, only the first worker's label is left to clean up, and the
/// run reports the probe failure.
#[tokio::test(start_paused = true)]
async fn story_failing_probe_aborts_and_cleans_up_earlier_nodes() {
    let device = intel_x710();
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0", "worker-1", "worker-2"])
        .with_device("worker-0", &device, CONFIGURED)
        .with_device("worker-1", &device, FAILED)
        .with_device("worker-2", &device, CONFIGURED);

    let report = Workflow::new(config_with(vec![device]), cluster.backends())
        .run()
        .await;

    match &report.outcome {
        RunOutcome::Failed(Error::Probe { node, resource, .. }) => {
            assert_eq!(node, "worker-1");
            assert_eq!(resource, "intelx710");
        }
        other => panic!("expected probe failure, got {:?}", other),
    }
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.teardown.completed,
        vec!["remove label node.sriovStatus from node worker-0"]
    );

    let journal = cluster.journal();
    assert!(!journal.iter().any(|e| e.contains("worker-2")));
    assert!(cluster.applied_files().iter().all(|f| f == DEBUG_POD_FIXTURE));
    assert!(cluster.created().is_empty());
    assert!(cluster.residual_labels().is_empty());
}

/// Story: control-plane nodes are never probed
#[tokio::test(start_paused = true)]
async fn story_control_plane_nodes_are_left_alone() {
    let device = intel_x710();
    let cluster = FakeCluster::new()
        .with_workers(&["master-0", "worker-0"])
        .with_control_plane(&["master-0"])
        .with_device("master-0", &device, CONFIGURED);

    let report = Workflow::new(config_with(vec![device]), cluster.backends())
        .run()
        .await;

    assert!(matches!(report.outcome, RunOutcome::Skipped(_)));
    assert!(!cluster.journal().iter().any(|e| e.contains("master-0")));
}

/// Story: the node debug pod moves from node to node
///
/// Each node is labeled before its debug pod is created, and the pod is
/// gone before the next node is labeled.
#[tokio::test(start_paused = true)]
async fn story_debug_pod_is_confined_to_one_node_at_a_time() {
    let device = intel_x710();
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0", "worker-1"])
        .with_device("worker-0", &device, CONFIGURED);

    Workflow::new(config_with(vec![device]), cluster.backends())
        .run()
        .await;

    let journal = cluster.journal();
    let position = |entry: &str| {
        journal
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("missing {}", entry))
    };
    let first_delete = position("delete debug-pod.yaml");
    let second_label = position("label worker-1 node.sriovStatus=provisioning");
    assert!(position("label worker-0 node.sriovStatus=provisioning") < position("apply debug-pod.yaml"));
    assert!(first_delete < second_label);
    assert!(position("label worker-0 node.sriovStatus=provisioned") < second_label);
}
