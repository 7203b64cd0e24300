//! Stories about the kube-backed collaborators
//!
//! These run against any cluster and only touch a temporary node label.

use sriov_harness::status::{ClusterStatus, KubeCluster, NodeInventory};

use super::helpers::{any_node, test_client};

const TEST_LABEL: &str = "sriov-harness.test/probe";

/// Story: a node label is set, seen through a selector, and removed again
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_node_label_round_trip() {
    let client = test_client().await;
    let node = any_node(&client).await;
    let cluster = KubeCluster::new(client);

    cluster
        .set_node_label(&node, TEST_LABEL, "provisioning")
        .await
        .expect("failed to label node");
    let selected = cluster
        .list_nodes(&format!("{}=provisioning", TEST_LABEL))
        .await
        .expect("failed to list nodes");
    assert_eq!(selected, vec![node.clone()]);

    cluster
        .remove_node_label(&node, TEST_LABEL)
        .await
        .expect("failed to remove label");
    let selected = cluster
        .list_nodes(&format!("{}=provisioning", TEST_LABEL))
        .await
        .expect("failed to list nodes");
    assert!(selected.is_empty());
}

/// Story: status queries distinguish present from absent objects
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_queries_report_absence_as_not_ready() {
    let cluster = KubeCluster::new(test_client().await);

    assert!(cluster
        .service_exists("default", "kubernetes")
        .await
        .expect("service query failed"));
    assert!(!cluster
        .service_exists("default", "sriov-harness-missing")
        .await
        .expect("service query failed"));
    assert!(!cluster
        .daemon_set_ready("kube-system", "sriov-harness-missing")
        .await
        .expect("daemon set query failed"));
    assert!(!cluster
        .webhook_exists("sriov-harness-missing")
        .await
        .expect("webhook query failed"));
    assert!(cluster
        .pod_metadata("default", "sriov-harness-missing")
        .await
        .expect("pod query failed")
        .is_none());
}

/// Story: kube-proxy is rolled out on every kind node
#[tokio::test]
#[ignore = "requires a kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_system_daemon_set_is_ready() {
    let cluster = KubeCluster::new(test_client().await);

    assert!(cluster
        .daemon_set_ready("kube-system", "kube-proxy")
        .await
        .expect("daemon set query failed"));
}
