//! Shared helpers for live-cluster tests

use kube::api::{Api, ListParams};
use k8s_openapi::api::core::v1::Node;
use kube::{Client, ResourceExt};

/// Client for the cluster in the default kubeconfig
pub async fn test_client() -> Client {
    Client::try_default()
        .await
        .expect("failed to create kube client from default kubeconfig")
}

/// Name of any node in the cluster
pub async fn any_node(client: &Client) -> String {
    let nodes: Api<Node> = Api::all(client.clone());
    nodes
        .list(&ListParams::default())
        .await
        .expect("failed to list nodes")
        .items
        .first()
        .map(|n| n.name_any())
        .expect("cluster has no nodes")
}
