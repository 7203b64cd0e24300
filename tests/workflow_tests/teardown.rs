//! Stories about cleanup
//!
//! Cleanup runs newest first, exactly once, and a cleanup that keeps
//! failing is recorded without stopping the ones registered before it.

use sriov_harness::workflow::{RunOutcome, Workflow, WorkflowState};
use sriov_harness::Error;

use super::fake::FakeCluster;
use super::{config_with, intel_x710, CONFIGURED};

fn single_capable_worker() -> std::sync::Arc<FakeCluster> {
    FakeCluster::new()
        .with_workers(&["worker-0"])
        .with_device("worker-0", &intel_x710(), CONFIGURED)
}

/// Story: everything is undone in the reverse of creation order
///
/// Dependents go before their dependencies: the workload before the
/// plugins, the plugins before the admission controller, and the node label
/// last of all.
#[tokio::test(start_paused = true)]
async fn story_teardown_runs_in_reverse_registration_order() {
    let cluster = single_capable_worker();

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    assert!(matches!(report.outcome, RunOutcome::Passed));
    assert_eq!(
        report.teardown.completed,
        vec![
            "delete workload testpod-intelx710",
            "uninstall cni plugin",
            "uninstall device plugin",
            "uninstall admission controller server",
            "uninstall admission controller webhook",
            "uninstall admission controller config map",
            "uninstall admission controller service account",
            "uninstall admission controller service",
            "remove label node.sriovStatus from node worker-0",
        ]
    );

    let journal = cluster.journal();
    let deletes: Vec<&str> = journal
        .iter()
        .skip_while(|e| !e.starts_with("delete sriov-cni"))
        .filter_map(|e| e.strip_prefix("delete "))
        .collect();
    assert_eq!(
        deletes,
        vec![
            "sriov-cni-daemonset.yaml",
            "sriov-device-plugin-daemonset.yaml",
            "crd-intelx710.yaml",
            "sriov-device-plugin-configmap.yaml",
            "sriov-admission-controller-server.yaml",
            "sriov-admission-controller-webhook.yaml",
            "sriov-admission-controller-configmap.yaml",
            "sriov-admission-controller-service-account.yaml",
            "sriov-admission-controller-service.yaml",
        ]
    );
    assert_eq!(journal.last().map(String::as_str), Some("unlabel worker-0 node.sriovStatus"));
}

/// Story: one cleanup keeps failing
///
/// The failing action is retried, then recorded; every action registered
/// before it still runs, and the run result is unaffected.
#[tokio::test(start_paused = true)]
async fn story_failing_cleanup_does_not_block_the_rest() {
    let cluster = single_capable_worker().failing_delete("sriov-cni-daemonset.yaml");

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    assert!(matches!(report.outcome, RunOutcome::Passed));
    assert_eq!(report.teardown.failed.len(), 1);
    assert_eq!(report.teardown.failed[0].action, "uninstall cni plugin");
    assert_eq!(report.teardown.completed.len(), 8);
    assert!(report
        .teardown
        .completed
        .contains(&"remove label node.sriovStatus from node worker-0".to_string()));

    let attempts = cluster
        .journal()
        .iter()
        .filter(|e| *e == "delete-failed sriov-cni-daemonset.yaml")
        .count();
    assert_eq!(attempts, 3);
}

/// Story: the CNI daemon set never becomes ready
///
/// The readiness timeout is the run's failure, nothing is verified, and
/// all seven installed steps are still removed because each was registered
/// before its readiness wait.
#[tokio::test(start_paused = true)]
async fn story_readiness_timeout_still_tears_down_installed_steps() {
    let cluster = single_capable_worker().stuck_daemon_set("kube-sriov-cni-ds-amd64");

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    match &report.outcome {
        RunOutcome::Failed(Error::ReadinessTimeout { target, .. }) => {
            assert!(target.contains("kube-sriov-cni-ds-amd64"));
        }
        other => panic!("expected readiness timeout, got {:?}", other),
    }
    assert!(!report.states.contains(&WorkflowState::Verifying));
    assert_eq!(
        report
            .teardown
            .completed
            .iter()
            .filter(|a| a.starts_with("uninstall "))
            .count(),
        7
    );
    assert!(cluster.created().is_empty());
    assert!(cluster.residual_labels().is_empty());
}

/// Story: a leftover object from an earlier run blocks installation
///
/// Creation refuses to adopt the existing object, so the run fails at that
/// step and only removes what it created itself.
#[tokio::test(start_paused = true)]
async fn story_existing_object_fails_installation_without_deleting_it() {
    use sriov_harness::apply::{Declaration, ManifestApplier};

    let cluster = single_capable_worker();
    cluster
        .apply(&Declaration::new(
            "/leftover/sriov-admission-controller-webhook.yaml",
            "kube-system",
        ))
        .await
        .unwrap();

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    assert!(matches!(report.outcome, RunOutcome::Failed(Error::Install { .. })));
    let uninstalled: Vec<&str> = report
        .teardown
        .completed
        .iter()
        .filter(|a| a.starts_with("uninstall "))
        .map(String::as_str)
        .collect();
    assert_eq!(
        uninstalled,
        vec![
            "uninstall admission controller config map",
            "uninstall admission controller service account",
            "uninstall admission controller service",
        ]
    );
    assert!(cluster
        .created()
        .contains("sriov-admission-controller-webhook.yaml"));
}

/// Story: the workload cannot be deleted once it has been verified
///
/// Deleting the verification workload is cleanup, not verification. The
/// run passes and the stuck workload shows up only in the teardown report.
#[tokio::test(start_paused = true)]
async fn story_undeletable_workload_is_a_teardown_failure_only() {
    let cluster = single_capable_worker().failing_delete("pod-intelx710.yaml");

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    assert!(
        matches!(report.outcome, RunOutcome::Passed),
        "unexpected outcome {:?}",
        report.outcome
    );
    assert_eq!(report.teardown.failed.len(), 1);
    assert_eq!(report.teardown.failed[0].action, "delete workload testpod-intelx710");
    assert_eq!(
        report
            .teardown
            .completed
            .iter()
            .filter(|a| a.starts_with("uninstall "))
            .count(),
        7
    );

    // One inline attempt after verification, then the bounded retries
    let attempts = cluster
        .journal()
        .iter()
        .filter(|e| *e == "delete-failed pod-intelx710.yaml")
        .count();
    assert_eq!(attempts, 4);
}

/// Story: a node without devices refuses to drop its label
///
/// The label removal is retried during teardown instead of failing the run.
#[tokio::test(start_paused = true)]
async fn story_unlabel_failure_on_incapable_node_is_deferred() {
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0", "worker-1"])
        .with_device("worker-0", &intel_x710(), CONFIGURED)
        .failing_unlabel("worker-1");

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    assert!(
        matches!(report.outcome, RunOutcome::Passed),
        "unexpected outcome {:?}",
        report.outcome
    );
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.teardown.failed.len(), 1);
    assert_eq!(
        report.teardown.failed[0].action,
        "remove label node.sriovStatus from node worker-1"
    );
    assert!(report
        .teardown
        .completed
        .contains(&"remove label node.sriovStatus from node worker-0".to_string()));

    let attempts = cluster
        .journal()
        .iter()
        .filter(|e| *e == "unlabel-failed worker-1 node.sriovStatus")
        .count();
    assert_eq!(attempts, 4);
    assert_eq!(
        cluster.residual_labels(),
        vec!["worker-1 node.sriovStatus=provisioning"]
    );
}

/// Story: the node advertises fewer VFs than were created
///
/// Verification fails before any workload is deployed, and everything
/// installed so far is still removed newest first.
#[tokio::test(start_paused = true)]
async fn story_allocatable_mismatch_fails_and_tears_down_in_reverse() {
    let cluster = single_capable_worker().misreport_allocatable("worker-0", "2");

    let report = Workflow::new(config_with(vec![intel_x710()]), cluster.backends())
        .run()
        .await;

    match &report.outcome {
        RunOutcome::Failed(Error::Verification { node, reason, .. }) => {
            assert_eq!(node, "worker-0");
            assert!(reason.contains("expected 4"), "reason: {}", reason);
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
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
    assert_eq!(
        report.teardown.completed,
        vec![
            "uninstall cni plugin",
            "uninstall device plugin",
            "uninstall admission controller server",
            "uninstall admission controller webhook",
            "uninstall admission controller config map",
            "uninstall admission controller service account",
            "uninstall admission controller service",
            "remove label node.sriovStatus from node worker-0",
        ]
    );
    assert!(cluster.applied_files().iter().all(|f| !f.starts_with("pod-")));
    assert!(cluster.created().is_empty());
    assert!(cluster.residual_labels().is_empty());
}
