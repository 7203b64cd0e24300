//! Harness configuration
//!
//! Everything a run depends on is carried in [`HarnessConfig`], which is
//! handed to the workflow driver at construction. Defaults reproduce the
//! standard SR-IOV fixture layout; a YAML file can override
//! any subset of fields.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{default_catalog, is_pci_id, DeviceFamily, DeviceSpec};
use crate::ledger::ResourceRecord;
use crate::Error;

/// Admission controller service declaration
pub const ADMISSION_SERVICE_FIXTURE: &str = "sriov-admission-controller-service.yaml";
/// Admission controller service account declaration
pub const ADMISSION_SERVICE_ACCOUNT_FIXTURE: &str =
    "sriov-admission-controller-service-account.yaml";
/// Admission controller config map declaration
pub const ADMISSION_CONFIG_MAP_FIXTURE: &str = "sriov-admission-controller-configmap.yaml";
/// Admission controller webhook declaration
pub const ADMISSION_WEBHOOK_FIXTURE: &str = "sriov-admission-controller-webhook.yaml";
/// Admission controller server daemon declaration
pub const ADMISSION_SERVER_FIXTURE: &str = "sriov-admission-controller-server.yaml";
/// Device plugin config map declaration
pub const DEVICE_PLUGIN_CONFIG_FIXTURE: &str = "sriov-device-plugin-configmap.yaml";
/// Device plugin daemon set declaration
pub const DEVICE_PLUGIN_DAEMON_FIXTURE: &str = "sriov-device-plugin-daemonset.yaml";
/// CNI daemon set declaration
pub const CNI_DAEMON_FIXTURE: &str = "sriov-cni-daemonset.yaml";
/// Node debug pod declaration
pub const DEBUG_POD_FIXTURE: &str = "debug-pod.yaml";

/// Which end-to-end flow a run exercises
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// VFs on kernel drivers, full admission controller stack, `net1` check
    #[default]
    Netdevice,
    /// VFs rebound to vfio-pci, device plugin and CNI only, device-file check
    Dpdk,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Netdevice => write!(f, "netdevice"),
            Self::Dpdk => write!(f, "dpdk"),
        }
    }
}

impl FromStr for Flow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "netdevice" => Ok(Self::Netdevice),
            "dpdk" => Ok(Self::Dpdk),
            other => Err(Error::config(format!(
                "unknown flow '{}', expected netdevice or dpdk",
                other
            ))),
        }
    }
}

/// Names of the cluster objects the installer waits on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfraNames {
    /// Admission controller service
    pub admission_service: String,
    /// Admission controller service account
    pub admission_service_account: String,
    /// Admission controller config map
    pub admission_config_map: String,
    /// Admission webhook configuration (cluster scoped)
    pub admission_webhook: String,
    /// Admission controller server daemon set
    pub admission_server: String,
    /// Device plugin daemon set
    pub device_plugin: String,
    /// CNI daemon set
    pub cni: String,
}

impl Default for InfraNames {
    fn default() -> Self {
        Self {
            admission_service: "network-resources-injector-service".to_string(),
            admission_service_account: "network-resources-injector-sa".to_string(),
            admission_config_map: "network-resources-injector-config".to_string(),
            admission_webhook: "network-resources-injector-config".to_string(),
            admission_server: "network-resources-injector".to_string(),
            device_plugin: "kube-sriov-device-plugin-amd64".to_string(),
            cni: "kube-sriov-cni-ds-amd64".to_string(),
        }
    }
}

/// Configuration for one harness run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarnessConfig {
    /// Flow to run
    pub flow: Flow,
    /// Virtual functions requested per device
    pub vf_count: u32,
    /// Namespace for debug pods, workloads and network attachments
    pub test_namespace: String,
    /// Namespace for infrastructure components
    pub infra_namespace: String,
    /// Base directory of resource declarations
    pub fixture_dir: PathBuf,
    /// Base directory of DPDK-flow declarations (defaults to `<fixture_dir>/dpdk`)
    pub dpdk_fixture_dir: Option<PathBuf>,
    /// Label key set on nodes while they are being provisioned
    pub node_label_key: String,
    /// Label selector for the nodes to probe
    pub worker_selector: String,
    /// Selectors identifying control-plane nodes
    pub control_plane_selectors: Vec<String>,
    /// Skip nodes matching `control_plane_selectors`
    pub exclude_control_plane: bool,
    /// Domain prefix of the allocatable resource names
    pub resource_prefix: String,
    /// Suffix appended to vfio-family resource names in the DPDK flow
    pub dpdk_resource_suffix: String,
    /// Readiness poll interval in seconds
    pub poll_interval_secs: u64,
    /// Readiness timeout for infrastructure and workloads, in seconds
    pub readiness_timeout_secs: u64,
    /// Timeout for workload metadata to appear, in seconds
    pub metadata_timeout_secs: u64,
    /// Delay between installation and the allocatable check, in seconds
    pub settle_secs: u64,
    /// DPDK flow: delay between VF creation and vfio binding, in seconds
    pub vf_settle_secs: u64,
    /// Minimum numbered `/dev/vfio` group files expected in a vfio workload
    pub min_vfio_groups: usize,
    /// Attempts per cleanup action before it is recorded as failed
    pub cleanup_attempts: u32,
    /// Name of the node debug pod
    pub debug_pod_name: String,
    /// Shell filter the webhook declaration is piped through before creation
    pub webhook_patch_command: Option<String>,
    /// Names of the objects readiness checks look up
    pub names: InfraNames,
    /// Device catalog
    pub catalog: Vec<DeviceSpec>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            flow: Flow::Netdevice,
            vf_count: 4,
            test_namespace: "sriov-e2e".to_string(),
            infra_namespace: "kube-system".to_string(),
            fixture_dir: PathBuf::from("test/extended/testdata/sriovnetwork"),
            dpdk_fixture_dir: None,
            node_label_key: "node.sriovStatus".to_string(),
            worker_selector: "node-role.kubernetes.io/worker=".to_string(),
            control_plane_selectors: vec![
                "node-role.kubernetes.io/master=".to_string(),
                "node-role.kubernetes.io/control-plane=".to_string(),
            ],
            exclude_control_plane: true,
            resource_prefix: "openshift.com".to_string(),
            dpdk_resource_suffix: "dpdk".to_string(),
            poll_interval_secs: 2,
            readiness_timeout_secs: 180,
            metadata_timeout_secs: 30,
            settle_secs: 60,
            vf_settle_secs: 20,
            min_vfio_groups: 1,
            cleanup_attempts: 3,
            debug_pod_name: "sriov-debug-pod".to_string(),
            webhook_patch_command: None,
            names: InfraNames::default(),
            catalog: default_catalog(),
        }
    }
}

impl HarnessConfig {
    /// Load a config from a YAML file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a config from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        serde_yaml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), Error> {
        if self.vf_count == 0 {
            return Err(Error::config("vfCount must be greater than zero"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("pollIntervalSecs must be greater than zero"));
        }
        if self.readiness_timeout_secs < self.poll_interval_secs
            || self.metadata_timeout_secs < self.poll_interval_secs
        {
            return Err(Error::config(
                "readiness and metadata timeouts must not be shorter than the poll interval",
            ));
        }
        if self.catalog.is_empty() {
            return Err(Error::config("device catalog is empty"));
        }
        if self.cleanup_attempts == 0 {
            return Err(Error::config("cleanupAttempts must be at least 1"));
        }

        let mut seen = HashSet::new();
        for device in &self.catalog {
            if !is_pci_id(&device.vendor_id) || !is_pci_id(&device.device_id) {
                return Err(Error::config(format!(
                    "device {} has a malformed PCI id {}",
                    device.resource_name,
                    device.pci_id()
                )));
            }
            if !seen.insert(device.resource_name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate resource name {} in catalog",
                    device.resource_name
                )));
            }
        }

        Ok(())
    }

    /// Readiness poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Readiness timeout for infrastructure and workloads
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Timeout for workload metadata
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Delay before allocatable accounting is read
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Delay before VFs are bound to vfio
    pub fn vf_settle_delay(&self) -> Duration {
        Duration::from_secs(self.vf_settle_secs)
    }

    /// Directory holding the DPDK-flow declarations
    pub fn dpdk_dir(&self) -> PathBuf {
        self.dpdk_fixture_dir
            .clone()
            .unwrap_or_else(|| self.fixture_dir.join("dpdk"))
    }

    /// Path of a declaration in the base fixture directory
    pub fn fixture(&self, file: &str) -> PathBuf {
        self.fixture_dir.join(file)
    }

    /// Device plugin config map declaration for the configured flow
    pub fn device_plugin_config_fixture(&self) -> PathBuf {
        match self.flow {
            Flow::Netdevice => self.fixture(DEVICE_PLUGIN_CONFIG_FIXTURE),
            Flow::Dpdk => self.dpdk_dir().join(DEVICE_PLUGIN_CONFIG_FIXTURE),
        }
    }

    /// Network attachment declaration for a resource
    pub fn network_attachment_fixture(&self, resource: &str) -> PathBuf {
        match self.flow {
            Flow::Netdevice => self.fixture(&format!("crd-{}.yaml", resource)),
            Flow::Dpdk => self.dpdk_dir().join(format!("crd-{}-dpdk.yaml", resource)),
        }
    }

    /// Workload declaration for a resource
    pub fn workload_fixture(&self, resource: &str) -> PathBuf {
        match self.flow {
            Flow::Netdevice => self.fixture(&format!("pod-{}.yaml", resource)),
            Flow::Dpdk => self.dpdk_dir().join(format!("pod-{}-dpdk.yaml", resource)),
        }
    }

    /// Pod name of the workload declared for a resource
    pub fn workload_name(&self, resource: &str) -> String {
        match self.flow {
            Flow::Netdevice => format!("testpod-{}", resource),
            Flow::Dpdk => format!("testpod-{}-dpdk", resource),
        }
    }

    /// Fully qualified allocatable resource name for a ledger record
    ///
    /// In the DPDK flow vfio-family devices are advertised under a suffixed
    /// name so they do not collide with the kernel-driver pool.
    pub fn allocatable_resource(&self, record: &ResourceRecord) -> String {
        let suffix = match (self.flow, record.family) {
            (Flow::Dpdk, DeviceFamily::Vfio) => self.dpdk_resource_suffix.as_str(),
            _ => "",
        };
        format!(
            "{}/{}{}",
            self.resource_prefix, record.resource_name, suffix
        )
    }
}
