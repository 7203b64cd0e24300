//! Provisioning Probe
//!
//! Provisioning runs node-local scripts inside a privileged debug pod that
//! is pinned to the node being provisioned through the provisioning label.
//! The scripts report their result through marker strings in their output,
//! classified in [`crate::markers`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::apply::{Declaration, ManifestApplier};
use crate::catalog::DeviceSpec;
use crate::config::{HarnessConfig, DEBUG_POD_FIXTURE};
use crate::exec::{CommandExecutor, ExecTarget};
use crate::markers::{classify_bind, classify_provision, classify_unbind, ScriptResult};
use crate::poll::wait_until_ready;
use crate::status::ClusterStatus;
use crate::Error;

/// Script creating VFs on the node
pub const PROVISION_SCRIPT: &str = "/provision_sriov.sh";

/// Script binding VFs to (and releasing them from) vfio-pci
pub const BIND_SCRIPT: &str = "/bind_dpdk.sh";

/// Result of enabling one device on one node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// VFs were created
    Configured {
        /// Logical resource name of the device
        resource_name: String,
        /// Number of VFs created
        vf_count: u32,
    },
    /// The node has the device but VF creation failed
    Failed {
        /// Script output or execution error
        reason: String,
    },
    /// The device is not present on the node
    NotApplicable,
}

/// Result of binding a node's VFs to vfio-pci
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    /// VFs are now vfio-bound and must be released at teardown
    Bound,
    /// Nothing on the node was eligible
    Skipped,
}

/// Command line of the provisioning script for one device
pub fn provision_command(device: &DeviceSpec, vf_count: u32) -> Vec<String> {
    vec![
        PROVISION_SCRIPT.to_string(),
        "-c".to_string(),
        vf_count.to_string(),
        "-v".to_string(),
        device.vendor_id.clone(),
        "-d".to_string(),
        device.device_id.clone(),
    ]
}

fn bind_command(flag: &str) -> Vec<String> {
    vec![BIND_SCRIPT.to_string(), flag.to_string()]
}

/// Runs the node-local provisioning scripts
#[derive(Clone)]
pub struct Prober {
    exec: Arc<dyn CommandExecutor>,
    vf_count: u32,
}

impl Prober {
    /// Create a prober requesting `vf_count` VFs per device
    pub fn new(exec: Arc<dyn CommandExecutor>, vf_count: u32) -> Self {
        Self { exec, vf_count }
    }

    /// Attempt to create VFs for `device` on the node behind `target`
    pub async fn probe(&self, target: &ExecTarget, node: &str, device: &DeviceSpec) -> ProvisionOutcome {
        let command = provision_command(device, self.vf_count);
        let output = match self.exec.exec(target, &command).await {
            Ok(output) => output,
            Err(e) => {
                return ProvisionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        debug!(node, device = %device, output = %output.trim(), "provision script finished");

        match classify_provision(&output) {
            ScriptResult::Success => {
                info!(node, resource = %device.resource_name, vf_count = self.vf_count, "VFs configured");
                ProvisionOutcome::Configured {
                    resource_name: device.resource_name.clone(),
                    vf_count: self.vf_count,
                }
            }
            ScriptResult::Failure => ProvisionOutcome::Failed {
                reason: output.trim().to_string(),
            },
            ScriptResult::NotApplicable => {
                debug!(node, device = %device, "device not present");
                ProvisionOutcome::NotApplicable
            }
        }
    }

    /// Bind the node's VFs to vfio-pci
    ///
    /// # Returns
    /// [`BindOutcome::Bound`] or [`BindOutcome::Skipped`]; a reported bind
    /// failure is an [`Error::Probe`].
    pub async fn bind_vfio(&self, target: &ExecTarget, node: &str) -> Result<BindOutcome, Error> {
        let output = self
            .exec
            .exec(target, &bind_command("-b"))
            .await
            .map_err(|e| Error::probe(node, "vfio", e.to_string()))?;
        debug!(node, output = %output.trim(), "bind script finished");

        match classify_bind(&output) {
            ScriptResult::Success => {
                info!(node, "VFs bound to vfio-pci");
                Ok(BindOutcome::Bound)
            }
            ScriptResult::Failure => Err(Error::probe(node, "vfio", output.trim())),
            ScriptResult::NotApplicable => {
                info!(node, "no VFs eligible for vfio binding");
                Ok(BindOutcome::Skipped)
            }
        }
    }

    /// Release the node's VFs from vfio-pci
    pub async fn unbind_vfio(&self, target: &ExecTarget, node: &str) -> Result<(), Error> {
        let action = format!("unbind vfio VFs on node {}", node);
        let output = self
            .exec
            .exec(target, &bind_command("-u"))
            .await
            .map_err(|e| Error::cleanup(&action, e.to_string()))?;

        match classify_unbind(&output) {
            ScriptResult::Success => {
                info!(node, "VFs released from vfio-pci");
                Ok(())
            }
            ScriptResult::Failure => Err(Error::cleanup(action, output.trim())),
            ScriptResult::NotApplicable => {
                info!(node, "nothing to unbind");
                Ok(())
            }
        }
    }

    /// Log the host interfaces visible from the debug pod
    pub async fn list_host_interfaces(&self, target: &ExecTarget, node: &str) -> Result<(), Error> {
        let command = ["ip", "-o", "link", "show"].map(String::from);
        let output = self.exec.exec(target, &command).await?;
        for line in output.lines() {
            debug!(node, interface = %line.trim(), "host interface");
        }
        Ok(())
    }
}

/// The privileged debug pod used to reach a node
///
/// The pod is scheduled onto whichever node carries the provisioning
/// label, so exactly one node may be labeled while a session is open.
pub struct DebugPod<'a> {
    applier: &'a dyn ManifestApplier,
    status: &'a dyn ClusterStatus,
    declaration: Declaration,
    target: ExecTarget,
    interval: Duration,
    timeout: Duration,
}

impl<'a> DebugPod<'a> {
    /// Describe the debug pod for a run
    pub fn new(
        config: &HarnessConfig,
        applier: &'a dyn ManifestApplier,
        status: &'a dyn ClusterStatus,
    ) -> Self {
        Self {
            applier,
            status,
            declaration: Declaration::new(
                config.fixture(DEBUG_POD_FIXTURE),
                &config.test_namespace,
            ),
            target: ExecTarget::pod(&config.test_namespace, &config.debug_pod_name),
            interval: config.poll_interval(),
            timeout: config.readiness_timeout(),
        }
    }

    /// Where commands for the labeled node run
    pub fn target(&self) -> &ExecTarget {
        &self.target
    }

    /// Create the pod and wait for it to run
    pub async fn start(&self) -> Result<(), Error> {
        self.applier.apply(&self.declaration).await?;

        let status = self.status;
        let target = &self.target;
        wait_until_ready(
            &format!("debug pod {}", target),
            self.interval,
            self.timeout,
            || async move { status.pod_ready(&target.namespace, &target.pod).await },
        )
        .await
    }

    /// Delete the pod and wait until it is gone
    ///
    /// The next node cannot be labeled until the previous pod has vanished,
    /// otherwise the new pod could land on the old node.
    pub async fn stop(&self) -> Result<(), Error> {
        self.applier.delete(&self.declaration).await?;

        let status = self.status;
        let target = &self.target;
        wait_until_ready(
            &format!("debug pod {} deletion", target),
            self.interval,
            self.timeout,
            || async move {
                status
                    .pod_exists(&target.namespace, &target.pod)
                    .await
                    .map(|exists| !exists)
            },
        )
        .await
    }

    /// Stop the pod, logging instead of failing
    pub async fn stop_quietly(&self) {
        if let Err(e) = self.stop().await {
            warn!(pod = %self.target, error = %e, "failed to remove debug pod");
        }
    }
}
