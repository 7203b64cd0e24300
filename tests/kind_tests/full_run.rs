//! A complete run on SR-IOV hardware
//!
//! The run must pass or skip; either way it must leave no provisioning
//! labels behind.

use std::path::PathBuf;

use sriov_harness::config::HarnessConfig;
use sriov_harness::kubectl::Kubectl;
use sriov_harness::status::{KubeCluster, NodeInventory};
use sriov_harness::workflow::{Backends, RunOutcome, Workflow};

use super::helpers::test_client;

/// Story: an operator runs the harness against a lab cluster
#[tokio::test]
#[ignore = "requires SR-IOV workers and SRIOV_HARNESS_CONFIG - run with: cargo test --test kind full_run -- --ignored"]
async fn story_full_run_leaves_cluster_clean() {
    let path = std::env::var("SRIOV_HARNESS_CONFIG").expect("SRIOV_HARNESS_CONFIG not set");
    let config = HarnessConfig::from_file(&PathBuf::from(path)).expect("invalid harness config");
    config.validate().expect("invalid harness config");
    let label_key = config.node_label_key.clone();

    let client = test_client().await;
    let backends = Backends::kube(client.clone(), Kubectl::default());
    let report = Workflow::new(config, backends).run().await;

    assert!(
        !matches!(report.outcome, RunOutcome::Failed(_)),
        "run failed: {:?}",
        report.outcome
    );
    assert!(report.teardown.is_clean(), "cleanup failures: {:?}", report.teardown.failed);

    let labeled = KubeCluster::new(client)
        .list_nodes(&label_key)
        .await
        .expect("failed to list nodes");
    assert!(labeled.is_empty(), "nodes still labeled: {:?}", labeled);
}
