//! Cluster status and node inventory collaborators
//!
//! Read-only status accessors used by readiness checks and verification,
//! plus the small amount of node mutation (labels) provisioning needs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Service, ServiceAccount};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::Error;

/// Labels and annotations of a pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodMetadata {
    /// Pod labels
    pub labels: BTreeMap<String, String>,
    /// Pod annotations
    pub annotations: BTreeMap<String, String>,
}

impl PodMetadata {
    /// Both labels and annotations are present
    pub fn is_populated(&self) -> bool {
        !self.labels.is_empty() && !self.annotations.is_empty()
    }
}

/// Trait abstracting cluster status queries for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStatus: Send + Sync {
    /// Whether a service exists
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Whether a service account exists
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Whether a config map exists
    async fn config_map_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Whether a validating or mutating webhook configuration exists
    async fn webhook_exists(&self, name: &str) -> Result<bool, Error>;

    /// Whether a daemon set has rolled out on every node it targets
    async fn daemon_set_ready(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Whether a pod is running and ready
    async fn pod_ready(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Whether a pod object exists at all
    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Labels and annotations of a pod, `None` if it does not exist
    async fn pod_metadata(&self, namespace: &str, name: &str)
        -> Result<Option<PodMetadata>, Error>;

    /// Advertised allocatable quantity of `resource` on `node`
    async fn allocatable(&self, node: &str, resource: &str) -> Result<Option<String>, Error>;
}

/// Trait abstracting node listing and labeling for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// Names of the nodes matching a label selector
    async fn list_nodes(&self, selector: &str) -> Result<Vec<String>, Error>;

    /// Set a label on a node
    async fn set_node_label(&self, node: &str, key: &str, value: &str) -> Result<(), Error>;

    /// Remove a label from a node
    async fn remove_node_label(&self, node: &str, key: &str) -> Result<(), Error>;
}

/// Whether a daemon set has a complete, ready rollout
pub fn daemon_set_is_ready(ds: &DaemonSet) -> bool {
    let Some(status) = ds.status.as_ref() else {
        return false;
    };
    let desired = status.desired_number_scheduled;
    desired > 0
        && status.number_ready == desired
        && status.updated_number_scheduled.unwrap_or(desired) == desired
}

/// Whether a pod is running with its Ready condition true
pub fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    let running = status.phase.as_deref() == Some("Running");
    let ready = status
        .conditions
        .as_ref()
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);
    running && ready
}

/// Real implementation backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Create a new KubeCluster wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterStatus for KubeCluster {
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn config_map_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn webhook_exists(&self, name: &str) -> Result<bool, Error> {
        let validating: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
        if validating.get_opt(name).await?.is_some() {
            return Ok(true);
        }
        let mutating: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        Ok(mutating.get_opt(name).await?.is_some())
    }

    async fn daemon_set_ready(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .get_opt(name)
            .await?
            .map(|ds| daemon_set_is_ready(&ds))
            .unwrap_or(false))
    }

    async fn pod_ready(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .get_opt(name)
            .await?
            .map(|pod| pod_is_ready(&pod))
            .unwrap_or(false))
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn pod_metadata(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodMetadata>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|pod| PodMetadata {
            labels: pod.labels().clone(),
            annotations: pod.annotations().clone(),
        }))
    }

    async fn allocatable(&self, node: &str, resource: &str) -> Result<Option<String>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(node).await?;
        Ok(node
            .status
            .and_then(|s| s.allocatable)
            .and_then(|mut alloc| alloc.remove(resource))
            .map(|q| q.0))
    }
}

#[async_trait]
impl NodeInventory for KubeCluster {
    async fn list_nodes(&self, selector: &str) -> Result<Vec<String>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default().labels(selector)).await?;
        let names: Vec<String> = nodes.items.iter().map(|n| n.name_any()).collect();
        debug!(selector, count = names.len(), "listed nodes");
        Ok(names)
    }

    async fn set_node_label(&self, node: &str, key: &str, value: &str) -> Result<(), Error> {
        info!(node, key, value, "labeling node");
        let patch = serde_json::json!({
            "metadata": { "labels": { key: value } }
        });
        let api: Api<Node> = Api::all(self.client.clone());
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_node_label(&self, node: &str, key: &str) -> Result<(), Error> {
        info!(node, key, "removing node label");
        let patch = serde_json::json!({
            "metadata": { "labels": { key: serde_json::Value::Null } }
        });
        let api: Api<Node> = Api::all(self.client.clone());
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
