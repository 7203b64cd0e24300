//! Infrastructure Installer - the cluster-side stack that exposes VFs
//!
//! The netdevice flow installs, in dependency order:
//!
//! 1. Admission controller service
//! 2. Admission controller service account
//! 3. Admission controller config map
//! 4. Admission controller webhook
//! 5. Admission controller server
//! 6. Device plugin (config map, one network attachment per resource, daemon set)
//! 7. CNI plugin daemon set
//!
//! The DPDK flow installs only steps 6 and 7. Each step is applied, its
//! uninstall is registered on the [`TeardownStack`], and only then is its
//! readiness awaited, so a step that never converges is still torn down.

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::apply::{Declaration, ManifestApplier};
use crate::config::{
    Flow, HarnessConfig, ADMISSION_CONFIG_MAP_FIXTURE, ADMISSION_SERVER_FIXTURE,
    ADMISSION_SERVICE_ACCOUNT_FIXTURE, ADMISSION_SERVICE_FIXTURE, ADMISSION_WEBHOOK_FIXTURE,
    CNI_DAEMON_FIXTURE, DEVICE_PLUGIN_DAEMON_FIXTURE,
};
use crate::poll::wait_until_ready;
use crate::status::ClusterStatus;
use crate::teardown::{CleanupAction, TeardownStack};
use crate::Error;

/// What "ready" means for one installation step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// A service exists
    Service {
        /// Namespace
        namespace: String,
        /// Service name
        name: String,
    },
    /// A service account exists
    ServiceAccount {
        /// Namespace
        namespace: String,
        /// Service account name
        name: String,
    },
    /// A config map exists
    ConfigMap {
        /// Namespace
        namespace: String,
        /// Config map name
        name: String,
    },
    /// An admission webhook configuration exists
    Webhook {
        /// Webhook configuration name
        name: String,
    },
    /// A daemon set is fully rolled out
    DaemonSet {
        /// Namespace
        namespace: String,
        /// Daemon set name
        name: String,
    },
}

impl Readiness {
    /// Query the cluster once
    pub async fn check(&self, status: &dyn ClusterStatus) -> Result<bool, Error> {
        match self {
            Self::Service { namespace, name } => status.service_exists(namespace, name).await,
            Self::ServiceAccount { namespace, name } => {
                status.service_account_exists(namespace, name).await
            }
            Self::ConfigMap { namespace, name } => status.config_map_exists(namespace, name).await,
            Self::Webhook { name } => status.webhook_exists(name).await,
            Self::DaemonSet { namespace, name } => status.daemon_set_ready(namespace, name).await,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service { namespace, name } => write!(f, "service {}/{}", namespace, name),
            Self::ServiceAccount { namespace, name } => {
                write!(f, "service account {}/{}", namespace, name)
            }
            Self::ConfigMap { namespace, name } => write!(f, "config map {}/{}", namespace, name),
            Self::Webhook { name } => write!(f, "webhook {}", name),
            Self::DaemonSet { namespace, name } => write!(f, "daemon set {}/{}", namespace, name),
        }
    }
}

/// One installation step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfraStep {
    /// Step name, used in logs and cleanup actions
    pub name: String,
    /// Declarations applied in order
    pub declarations: Vec<Declaration>,
    /// Condition awaited after application
    pub readiness: Readiness,
}

impl InfraStep {
    fn single(name: &str, declaration: Declaration, readiness: Readiness) -> Self {
        Self {
            name: name.to_string(),
            declarations: vec![declaration],
            readiness,
        }
    }
}

/// Installation steps for the configured flow
///
/// `resources` are the distinct resource names that need a network
/// attachment, normally those recorded in the ledger.
pub fn plan(config: &HarnessConfig, resources: &[&str]) -> Vec<InfraStep> {
    let ns = config.infra_namespace.as_str();
    let names = &config.names;
    let infra = |file: &str| Declaration::new(config.fixture(file), ns);

    let mut steps = Vec::new();
    if config.flow == Flow::Netdevice {
        steps.push(InfraStep::single(
            "admission controller service",
            infra(ADMISSION_SERVICE_FIXTURE),
            Readiness::Service {
                namespace: ns.to_string(),
                name: names.admission_service.clone(),
            },
        ));
        steps.push(InfraStep::single(
            "admission controller service account",
            infra(ADMISSION_SERVICE_ACCOUNT_FIXTURE),
            Readiness::ServiceAccount {
                namespace: ns.to_string(),
                name: names.admission_service_account.clone(),
            },
        ));
        steps.push(InfraStep::single(
            "admission controller config map",
            infra(ADMISSION_CONFIG_MAP_FIXTURE),
            Readiness::ConfigMap {
                namespace: ns.to_string(),
                name: names.admission_config_map.clone(),
            },
        ));
        steps.push(InfraStep::single(
            "admission controller webhook",
            infra(ADMISSION_WEBHOOK_FIXTURE).with_patch(config.webhook_patch_command.clone()),
            Readiness::Webhook {
                name: names.admission_webhook.clone(),
            },
        ));
        steps.push(InfraStep::single(
            "admission controller server",
            infra(ADMISSION_SERVER_FIXTURE),
            Readiness::DaemonSet {
                namespace: ns.to_string(),
                name: names.admission_server.clone(),
            },
        ));
    }

    let mut device_plugin = vec![Declaration::new(config.device_plugin_config_fixture(), ns)];
    device_plugin.extend(resources.iter().map(|res| {
        Declaration::new(
            config.network_attachment_fixture(res),
            &config.test_namespace,
        )
    }));
    device_plugin.push(infra(DEVICE_PLUGIN_DAEMON_FIXTURE));
    steps.push(InfraStep {
        name: "device plugin".to_string(),
        declarations: device_plugin,
        readiness: Readiness::DaemonSet {
            namespace: ns.to_string(),
            name: names.device_plugin.clone(),
        },
    });

    steps.push(InfraStep::single(
        "cni plugin",
        infra(CNI_DAEMON_FIXTURE),
        Readiness::DaemonSet {
            namespace: ns.to_string(),
            name: names.cni.clone(),
        },
    ));
    steps
}

/// Delete declarations, last applied first
///
/// Every declaration is attempted; the first failure is returned.
pub async fn uninstall(
    applier: &dyn ManifestApplier,
    declarations: &[Declaration],
) -> Result<(), Error> {
    let mut first_error = None;
    for declaration in declarations.iter().rev() {
        if let Err(e) = applier.delete(declaration).await {
            warn!(declaration = %declaration, error = %e, "failed to delete declaration");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Applies installation steps and waits for each to converge
pub struct Installer<'a> {
    applier: &'a dyn ManifestApplier,
    status: &'a dyn ClusterStatus,
    interval: Duration,
    timeout: Duration,
}

impl<'a> Installer<'a> {
    /// Create an installer using the run's poll interval and readiness timeout
    pub fn new(
        config: &HarnessConfig,
        applier: &'a dyn ManifestApplier,
        status: &'a dyn ClusterStatus,
    ) -> Self {
        Self {
            applier,
            status,
            interval: config.poll_interval(),
            timeout: config.readiness_timeout(),
        }
    }

    /// Install every step in order, stopping at the first failure
    pub async fn install_all(
        &self,
        steps: &[InfraStep],
        teardown: &mut TeardownStack,
    ) -> Result<(), Error> {
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            info!(step = %step.name, index = index + 1, total, "installing");
            self.install(step, teardown).await?;
        }
        info!(steps = total, "infrastructure ready");
        Ok(())
    }

    /// Install one step
    ///
    /// If a declaration fails partway through, the declarations of this
    /// step that were already created are deleted before returning, and
    /// nothing is registered for the step.
    pub async fn install(&self, step: &InfraStep, teardown: &mut TeardownStack) -> Result<(), Error> {
        let mut applied = Vec::with_capacity(step.declarations.len());
        for declaration in &step.declarations {
            if let Err(e) = self.applier.apply(declaration).await {
                if !applied.is_empty() {
                    warn!(step = %step.name, created = applied.len(), "rolling back partial step");
                    if let Err(rollback) = uninstall(self.applier, &applied).await {
                        warn!(step = %step.name, error = %rollback, "rollback incomplete");
                    }
                }
                return Err(match e {
                    Error::Install { .. } => e,
                    other => Error::install(&step.name, other.to_string()),
                });
            }
            applied.push(declaration.clone());
        }

        teardown.push(CleanupAction::Uninstall {
            step: step.name.clone(),
            declarations: applied,
        });

        let status = self.status;
        let readiness = &step.readiness;
        wait_until_ready(
            &readiness.to_string(),
            self.interval,
            self.timeout,
            || async move { readiness.check(status).await },
        )
        .await
    }
}
