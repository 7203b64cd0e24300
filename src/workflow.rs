//! Workflow Driver
//!
//! One run walks a fixed state machine:
//!
//! ```text
//! Idle -> Provisioning -> Skipped ------------------------> TearingDown -> Done
//!                      \-> InstallingInfra -> Verifying -/
//! ```
//!
//! Any failure jumps straight to `TearingDown`. The ledger and the teardown
//! stack are owned by the driver for the duration of the run and are only
//! touched from the single task executing [`Workflow::run`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::apply::{KubectlApplier, ManifestApplier};
use crate::config::{Flow, HarnessConfig};
use crate::exec::{CommandExecutor, KubectlExecutor};
use crate::install::{self, Installer};
use crate::kubectl::Kubectl;
use crate::ledger::{ResourceLedger, ResourceRecord};
use crate::probe::{BindOutcome, DebugPod, Prober, ProvisionOutcome};
use crate::retry::CleanupRetry;
use crate::status::{ClusterStatus, KubeCluster, NodeInventory};
use crate::teardown::{CleanupAction, TeardownReport, TeardownStack};
use crate::verify::Verifier;
use crate::Error;

/// Label value while a node is being provisioned; the debug pod selects on it
pub const LABEL_PROVISIONING: &str = "provisioning";

/// Label value of a node that holds provisioned VFs
pub const LABEL_PROVISIONED: &str = "provisioned";

/// Reason reported when nothing could be provisioned
pub const SKIP_REASON: &str = "no SR-IOV capable NIC configured";

/// The collaborators a run talks to
#[derive(Clone)]
pub struct Backends {
    /// Runs commands in pods
    pub exec: Arc<dyn CommandExecutor>,
    /// Creates and deletes declarations
    pub applier: Arc<dyn ManifestApplier>,
    /// Read-only cluster queries
    pub status: Arc<dyn ClusterStatus>,
    /// Node listing and labeling
    pub nodes: Arc<dyn NodeInventory>,
}

impl Backends {
    /// Backends talking to a real cluster
    pub fn kube(client: kube::Client, kubectl: Kubectl) -> Self {
        let cluster = Arc::new(KubeCluster::new(client));
        Self {
            exec: Arc::new(KubectlExecutor::new(kubectl.clone())),
            applier: Arc::new(KubectlApplier::new(kubectl)),
            status: cluster.clone(),
            nodes: cluster,
        }
    }
}

/// States of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowState {
    /// Not started
    Idle,
    /// Probing nodes
    Provisioning,
    /// Nothing was provisioned
    Skipped,
    /// Installing the infrastructure steps
    InstallingInfra,
    /// Checking allocatable accounting and consumption
    Verifying,
    /// Draining the teardown stack
    TearingDown,
    /// Finished
    Done,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::Skipped => "skipped",
            Self::InstallingInfra => "installing-infra",
            Self::Verifying => "verifying",
            Self::TearingDown => "tearing-down",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Everything provisioned was verified
    Passed,
    /// No capable hardware was found; not a failure
    Skipped(String),
    /// The first hard failure of the run
    Failed(Error),
}

impl RunOutcome {
    /// Whether the run should be reported as unsuccessful
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Ledger contents at the end of provisioning
    pub records: Vec<ResourceRecord>,
    /// States visited, in order
    pub states: Vec<WorkflowState>,
    /// What teardown did
    pub teardown: TeardownReport,
}

/// Serializable form of a [`RunReport`]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// `passed`, `skipped` or `failed`
    pub outcome: &'static str,
    /// Skip reason or failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Provisioned records
    pub records: Vec<ResourceRecord>,
    /// States visited
    pub states: Vec<WorkflowState>,
    /// Teardown results
    pub teardown: TeardownReport,
}

impl RunReport {
    /// Summary suitable for JSON output
    pub fn summary(&self) -> ReportSummary {
        let reason = match &self.outcome {
            RunOutcome::Passed => None,
            RunOutcome::Skipped(reason) => Some(reason.clone()),
            RunOutcome::Failed(e) => Some(e.to_string()),
        };
        ReportSummary {
            outcome: self.outcome.label(),
            reason,
            records: self.records.clone(),
            states: self.states.clone(),
            teardown: self.teardown.clone(),
        }
    }
}

/// What one node contributed during provisioning
struct NodeProvision {
    records: Vec<ResourceRecord>,
    bound: bool,
}

/// A single provisioning, verification and teardown run
pub struct Workflow {
    config: HarnessConfig,
    backends: Backends,
    state: WorkflowState,
    states: Vec<WorkflowState>,
    ledger: ResourceLedger,
    teardown: TeardownStack,
}

impl Workflow {
    /// Create a run; nothing touches the cluster until [`Workflow::run`]
    pub fn new(config: HarnessConfig, backends: Backends) -> Self {
        Self {
            config,
            backends,
            state: WorkflowState::Idle,
            states: vec![WorkflowState::Idle],
            ledger: ResourceLedger::new(),
            teardown: TeardownStack::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    fn transition(&mut self, to: WorkflowState) {
        info!(from = %self.state, to = %to, "workflow transition");
        self.state = to;
        self.states.push(to);
    }

    /// Execute the run to completion
    ///
    /// Teardown always runs, whatever happened before it. The outcome is
    /// the first hard failure, or pass/skip.
    pub async fn run(mut self) -> RunReport {
        let result = self.execute().await;

        self.transition(WorkflowState::TearingDown);
        let teardown = self.drain_teardown().await;
        self.transition(WorkflowState::Done);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(e),
        };
        match &outcome {
            RunOutcome::Passed => info!(
                records = self.ledger.len(),
                cleanup_failures = teardown.failed.len(),
                "PASSED"
            ),
            RunOutcome::Skipped(reason) => info!(reason = %reason, "SKIPPED"),
            RunOutcome::Failed(e) => error!(
                error = %e,
                cleanup_failures = teardown.failed.len(),
                "FAILED"
            ),
        }

        RunReport {
            outcome,
            records: self.ledger.into_records(),
            states: self.states,
            teardown,
        }
    }

    async fn execute(&mut self) -> Result<RunOutcome, Error> {
        self.transition(WorkflowState::Provisioning);
        self.provision().await?;

        if self.ledger.is_empty() {
            self.transition(WorkflowState::Skipped);
            return Ok(RunOutcome::Skipped(SKIP_REASON.to_string()));
        }

        self.transition(WorkflowState::InstallingInfra);
        let steps = install::plan(&self.config, &self.ledger.resource_names());
        Installer::new(
            &self.config,
            self.backends.applier.as_ref(),
            self.backends.status.as_ref(),
        )
        .install_all(&steps, &mut self.teardown)
        .await?;

        self.transition(WorkflowState::Verifying);
        let settle = self.config.settle_delay();
        info!(settle_secs = settle.as_secs(), "waiting for device plugin to advertise VFs");
        tokio::time::sleep(settle).await;

        let verifier = Verifier::new(
            &self.config,
            self.backends.exec.as_ref(),
            self.backends.applier.as_ref(),
            self.backends.status.as_ref(),
        );
        for record in self.ledger.all() {
            verifier.check_allocatable(record).await?;
        }
        for record in self.ledger.all() {
            verifier.verify(record, &mut self.teardown).await?;
        }

        Ok(RunOutcome::Passed)
    }

    /// Worker nodes to probe, control-plane nodes removed when configured
    async fn target_nodes(&self) -> Result<Vec<String>, Error> {
        let inventory = self.backends.nodes.as_ref();
        let mut nodes = inventory.list_nodes(&self.config.worker_selector).await?;

        if self.config.exclude_control_plane {
            let mut control_plane = BTreeSet::new();
            for selector in &self.config.control_plane_selectors {
                control_plane.extend(inventory.list_nodes(selector).await?);
            }
            nodes.retain(|node| {
                let worker = !control_plane.contains(node);
                if !worker {
                    info!(node = %node, "skipping control-plane node");
                }
                worker
            });
        }
        Ok(nodes)
    }

    async fn provision(&mut self) -> Result<(), Error> {
        let nodes = self.target_nodes().await?;
        if nodes.is_empty() {
            warn!(selector = %self.config.worker_selector, "no worker nodes to provision");
        }
        for node in &nodes {
            self.provision_node(node).await?;
        }
        info!(records = self.ledger.len(), "provisioning complete");
        Ok(())
    }

    /// Probe every catalog device on one node
    ///
    /// Records are committed to the ledger only once the whole node has
    /// been probed without a failure.
    async fn provision_node(&mut self, node: &str) -> Result<(), Error> {
        let inventory = self.backends.nodes.clone();
        let key = self.config.node_label_key.clone();

        info!(node = %node, "provisioning node");
        inventory.set_node_label(node, &key, LABEL_PROVISIONING).await?;

        let debug_pod = DebugPod::new(
            &self.config,
            self.backends.applier.as_ref(),
            self.backends.status.as_ref(),
        );
        let result = self.probe_node(&debug_pod, node).await;
        debug_pod.stop_quietly().await;

        let provision = match result {
            Ok(provision) if !provision.records.is_empty() => provision,
            Ok(_) => {
                info!(node = %node, "no applicable devices");
                self.unlabel_or_defer(node, &key).await;
                return Ok(());
            }
            Err(e) => {
                self.unlabel_or_defer(node, &key).await;
                return Err(e);
            }
        };

        self.teardown.push(CleanupAction::RemoveNodeLabel {
            node: node.to_string(),
            key: key.clone(),
        });
        if provision.bound {
            self.teardown.push(CleanupAction::UnbindVfio {
                node: node.to_string(),
            });
        }
        for record in provision.records {
            self.ledger.record(record);
        }
        inventory.set_node_label(node, &key, LABEL_PROVISIONED).await
    }

    /// Remove the provisioning label now, or leave it to teardown
    async fn unlabel_or_defer(&mut self, node: &str, key: &str) {
        if let Err(e) = self.backends.nodes.remove_node_label(node, key).await {
            warn!(node = %node, error = %e, "failed to remove provisioning label, deferring to teardown");
            self.teardown.push(CleanupAction::RemoveNodeLabel {
                node: node.to_string(),
                key: key.to_string(),
            });
        }
    }

    async fn probe_node(&self, debug_pod: &DebugPod<'_>, node: &str) -> Result<NodeProvision, Error> {
        debug_pod.start().await?;
        let target = debug_pod.target();
        let prober = Prober::new(self.backends.exec.clone(), self.config.vf_count);
        prober.list_host_interfaces(target, node).await?;

        let mut records = Vec::new();
        for device in &self.config.catalog {
            match prober.probe(target, node, device).await {
                ProvisionOutcome::Configured {
                    resource_name,
                    vf_count,
                } => records.push(ResourceRecord::new(node, resource_name, vf_count, device.family)),
                ProvisionOutcome::Failed { reason } => {
                    return Err(Error::probe(node, &device.resource_name, reason));
                }
                ProvisionOutcome::NotApplicable => {}
            }
        }

        let mut bound = false;
        if self.config.flow == Flow::Dpdk && !records.is_empty() {
            tokio::time::sleep(self.config.vf_settle_delay()).await;
            bound = prober.bind_vfio(target, node).await? == BindOutcome::Bound;
        }

        Ok(NodeProvision { records, bound })
    }

    async fn drain_teardown(&mut self) -> TeardownReport {
        let executor = CleanupExecutor {
            config: &self.config,
            backends: &self.backends,
        };
        let retry = CleanupRetry::new(self.config.cleanup_attempts);
        let executor = &executor;
        let retry = &retry;

        self.teardown
            .drain(|action| async move {
                let name = action.to_string();
                retry.run(&name, || executor.execute(&action)).await
            })
            .await
    }
}

/// Carries out cleanup actions against the backends
struct CleanupExecutor<'a> {
    config: &'a HarnessConfig,
    backends: &'a Backends,
}

impl CleanupExecutor<'_> {
    async fn execute(&self, action: &CleanupAction) -> Result<(), Error> {
        let result = match action {
            CleanupAction::RemoveNodeLabel { node, key } => {
                self.backends.nodes.remove_node_label(node, key).await
            }
            CleanupAction::Uninstall { declarations, .. } => {
                install::uninstall(self.backends.applier.as_ref(), declarations).await
            }
            CleanupAction::DeleteWorkload { declaration, .. } => {
                self.backends.applier.delete(declaration).await
            }
            CleanupAction::UnbindVfio { node } => self.unbind(node).await,
        };
        result.map_err(|e| match e {
            Error::Cleanup { .. } => e,
            other => Error::cleanup(action.to_string(), other.to_string()),
        })
    }

    /// Release vfio-bound VFs through a fresh debug pod on the node
    async fn unbind(&self, node: &str) -> Result<(), Error> {
        let inventory = self.backends.nodes.as_ref();
        let key = &self.config.node_label_key;
        inventory.set_node_label(node, key, LABEL_PROVISIONING).await?;

        let debug_pod = DebugPod::new(
            self.config,
            self.backends.applier.as_ref(),
            self.backends.status.as_ref(),
        );
        let prober = Prober::new(self.backends.exec.clone(), self.config.vf_count);
        let result = match debug_pod.start().await {
            Ok(()) => prober.unbind_vfio(debug_pod.target(), node).await,
            Err(e) => Err(e),
        };
        debug_pod.stop_quietly().await;

        let relabel = inventory.set_node_label(node, key, LABEL_PROVISIONED).await;
        result?;
        relabel
    }
}
