//! Stories about the DPDK flow
//!
//! In the DPDK flow VFs are rebound to vfio-pci after creation, only the
//! device plugin and CNI are installed, and vfio-family workloads are
//! checked for device files instead of a network interface.

use sriov_harness::catalog::DeviceFamily;
use sriov_harness::config::{Flow, HarnessConfig};
use sriov_harness::ledger::ResourceRecord;
use sriov_harness::workflow::{RunOutcome, Workflow};

use super::fake::FakeCluster;
use super::{intel_xxv710, CONFIGURED};

fn dpdk_config() -> HarnessConfig {
    HarnessConfig {
        flow: Flow::Dpdk,
        catalog: vec![intel_xxv710()],
        ..Default::default()
    }
}

/// Story: a vfio-capable NIC is bound, consumed and released
#[tokio::test(start_paused = true)]
async fn story_vfio_devices_are_bound_verified_and_released() {
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0"])
        .with_device("worker-0", &intel_xxv710(), CONFIGURED);

    let report = Workflow::new(dpdk_config(), cluster.backends()).run().await;

    assert!(
        matches!(report.outcome, RunOutcome::Passed),
        "unexpected outcome {:?}",
        report.outcome
    );
    assert_eq!(
        report.records,
        vec![ResourceRecord::new("worker-0", "intelxxv710", 4, DeviceFamily::Vfio)]
    );
    assert_eq!(
        report.teardown.completed,
        vec![
            "delete workload testpod-intelxxv710-dpdk",
            "uninstall cni plugin",
            "uninstall device plugin",
            "unbind vfio VFs on node worker-0",
            "remove label node.sriovStatus from node worker-0",
        ]
    );

    let journal = cluster.journal();
    assert!(journal.contains(&"exec worker-0 /bind_dpdk.sh -b".to_string()));
    assert!(journal.contains(&"exec worker-0 /bind_dpdk.sh -u".to_string()));
    assert!(journal.contains(&"exec testpod-intelxxv710-dpdk /bin/bash -c ls /dev/vfio".to_string()));
    assert!(cluster.created().is_empty());
    assert!(cluster.residual_labels().is_empty());
}

/// Story: DPDK installs only the plugins, from the DPDK declarations
#[tokio::test(start_paused = true)]
async fn story_dpdk_flow_skips_admission_controller() {
    let cluster = FakeCluster::new()
        .with_workers(&["worker-0"])
        .with_device("worker-0", &intel_xxv710(), CONFIGURED);

    Workflow::new(dpdk_config(), cluster.backends()).run().await;

    let applied = cluster.applied_files();
    assert!(!applied.iter().any(|f| f.starts_with("sriov-admission-controller")));
    assert!(applied.contains(&"crd-intelxxv710-dpdk.yaml".to_string()));
    assert!(applied.contains(&"pod-intelxxv710-dpdk.yaml".to_string()));
}

/// Story: nothing to bind on a node without capable hardware
#[tokio::test(start_paused = true)]
async fn story_nodes_without_vfs_are_not_bound() {
    let cluster = FakeCluster::new().with_workers(&["worker-0"]);

    let report = Workflow::new(dpdk_config(), cluster.backends()).run().await;

    assert!(matches!(report.outcome, RunOutcome::Skipped(_)));
    assert!(!cluster.journal().iter().any(|e| e.contains("/bind_dpdk.sh")));
}
