//! Consumption Verifier
//!
//! Confirms per ledger record that the node advertises the provisioned VFs
//! and that a workload claiming them actually receives them: a secondary
//! interface for kernel-driver devices, vfio device files for DPDK.

use tracing::{debug, info, warn};

use crate::apply::{Declaration, ManifestApplier};
use crate::catalog::DeviceFamily;
use crate::config::{Flow, HarnessConfig};
use crate::exec::{CommandExecutor, ExecTarget};
use crate::ledger::ResourceRecord;
use crate::markers::{link_mtu, vfio_listing, FILE_MISSING};
use crate::poll::wait_until_ready;
use crate::status::ClusterStatus;
use crate::teardown::{CleanupAction, TeardownStack};
use crate::Error;

/// Secondary interface attached by the CNI plugin
pub const SECONDARY_INTERFACE: &str = "net1";

fn shell(script: &str) -> Vec<String> {
    vec!["/bin/bash".to_string(), "-c".to_string(), script.to_string()]
}

/// Verifies allocatable accounting and workload consumption
pub struct Verifier<'a> {
    config: &'a HarnessConfig,
    exec: &'a dyn CommandExecutor,
    applier: &'a dyn ManifestApplier,
    status: &'a dyn ClusterStatus,
}

impl<'a> Verifier<'a> {
    /// Create a verifier
    pub fn new(
        config: &'a HarnessConfig,
        exec: &'a dyn CommandExecutor,
        applier: &'a dyn ManifestApplier,
        status: &'a dyn ClusterStatus,
    ) -> Self {
        Self {
            config,
            exec,
            applier,
            status,
        }
    }

    /// Check that the node advertises exactly the provisioned VF count
    pub async fn check_allocatable(&self, record: &ResourceRecord) -> Result<(), Error> {
        let resource = self.config.allocatable_resource(record);
        let advertised = self
            .status
            .allocatable(&record.node_name, &resource)
            .await?;
        let expected = record.vf_count.to_string();

        match advertised {
            Some(quantity) if quantity.trim() == expected => {
                info!(node = %record.node_name, resource = %resource, allocatable = %quantity, "allocatable matches");
                Ok(())
            }
            Some(quantity) => Err(Error::verification(
                &record.node_name,
                &record.resource_name,
                format!("{} allocatable is {}, expected {}", resource, quantity, expected),
            )),
            None => Err(Error::verification(
                &record.node_name,
                &record.resource_name,
                format!("{} is not advertised", resource),
            )),
        }
    }

    /// Deploy a workload claiming the record's resource and inspect it
    ///
    /// The workload's deletion is registered on `teardown` as soon as it
    /// is created. After a successful inspection the workload is also
    /// deleted right away, and the registered deletion becomes a no-op.
    pub async fn verify(
        &self,
        record: &ResourceRecord,
        teardown: &mut TeardownStack,
    ) -> Result<(), Error> {
        let config = self.config;
        let pod = config.workload_name(&record.resource_name);
        let declaration = Declaration::new(
            config.workload_fixture(&record.resource_name),
            &config.test_namespace,
        );

        info!(node = %record.node_name, resource = %record.resource_name, pod = %pod, "creating workload");
        self.applier.apply(&declaration).await.map_err(|e| {
            Error::verification(&record.node_name, &record.resource_name, e.to_string())
        })?;
        teardown.push(CleanupAction::DeleteWorkload {
            pod: pod.clone(),
            declaration: declaration.clone(),
        });

        let target = ExecTarget::pod(&config.test_namespace, &pod);
        let status = self.status;
        let ns = config.test_namespace.as_str();
        let name = pod.as_str();

        wait_until_ready(
            &format!("workload {}", target),
            config.poll_interval(),
            config.readiness_timeout(),
            || async move { status.pod_ready(ns, name).await },
        )
        .await?;

        if config.flow == Flow::Dpdk && record.family == DeviceFamily::Vfio {
            self.inspect_vfio(record, &target).await?;
        } else {
            self.inspect_interface(record, &target).await?;
        }

        wait_until_ready(
            &format!("workload {} metadata", target),
            config.poll_interval(),
            config.metadata_timeout(),
            || async move {
                status
                    .pod_metadata(ns, name)
                    .await
                    .map(|meta| meta.is_some_and(|m| m.is_populated()))
            },
        )
        .await?;

        info!(node = %record.node_name, resource = %record.resource_name, "consumption verified");

        // Records sharing a resource reuse the same workload name. A failed
        // delete stays soft: the registered DeleteWorkload retries it.
        if let Err(e) = self.applier.delete(&declaration).await {
            warn!(pod = %target, error = %e, "failed to delete workload, leaving it to teardown");
            return Ok(());
        }
        if let Err(e) = wait_until_ready(
            &format!("workload {} deletion", target),
            config.poll_interval(),
            config.readiness_timeout(),
            || async move { status.pod_exists(ns, name).await.map(|exists| !exists) },
        )
        .await
        {
            warn!(pod = %target, error = %e, "workload still present after delete");
        }
        Ok(())
    }

    async fn run(&self, record: &ResourceRecord, target: &ExecTarget, script: &str) -> Result<String, Error> {
        self.exec
            .exec(target, &shell(script))
            .await
            .map_err(|e| Error::verification(&record.node_name, &record.resource_name, e.to_string()))
    }

    async fn inspect_interface(&self, record: &ResourceRecord, target: &ExecTarget) -> Result<(), Error> {
        let output = self
            .run(record, target, &format!("ip link show dev {}", SECONDARY_INTERFACE))
            .await?;
        debug!(pod = %target, output = %output.trim(), "secondary interface");

        match link_mtu(&output) {
            Some(mtu) if mtu > 0 => Ok(()),
            _ => Err(Error::verification(
                &record.node_name,
                &record.resource_name,
                format!("{} missing or without MTU: {}", SECONDARY_INTERFACE, output.trim()),
            )),
        }
    }

    async fn inspect_vfio(&self, record: &ResourceRecord, target: &ExecTarget) -> Result<(), Error> {
        let fail = |reason: String| {
            Error::verification(&record.node_name, &record.resource_name, reason)
        };

        let container = self.run(record, target, "ls /dev/vfio/vfio").await?;
        if container.contains(FILE_MISSING) {
            return Err(fail(format!("/dev/vfio/vfio missing: {}", container.trim())));
        }

        let output = self.run(record, target, "ls /dev/vfio").await?;
        debug!(pod = %target, output = %output.trim(), "vfio devices");
        let listing = vfio_listing(&output)
            .ok_or_else(|| fail(format!("/dev/vfio missing: {}", output.trim())))?;

        if !listing.has_container {
            return Err(fail("vfio container device not listed".to_string()));
        }
        if listing.groups < self.config.min_vfio_groups {
            return Err(fail(format!(
                "{} vfio groups, expected at least {}",
                listing.groups, self.config.min_vfio_groups
            )));
        }
        Ok(())
    }
}
