//! Device Catalog - the SR-IOV capable NIC families the harness knows about
//!
//! Pure data. Each entry pairs a PCI vendor/device id with the logical
//! resource name its virtual functions are advertised under.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a workload consumes the VFs of a device family in the DPDK flow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// VFs stay on their kernel driver and show up as a secondary interface
    #[default]
    Netdevice,
    /// VFs are rebound to vfio-pci and show up as `/dev/vfio` device files
    Vfio,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Netdevice => write!(f, "netdevice"),
            Self::Vfio => write!(f, "vfio"),
        }
    }
}

/// One catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// PCI vendor id, four hex digits (e.g. "8086")
    pub vendor_id: String,
    /// PCI device id, four hex digits (e.g. "158b")
    pub device_id: String,
    /// Logical resource name the VFs are exposed as
    pub resource_name: String,
    /// Kernel driver the VFs bind to
    pub driver: String,
    /// Consumption family
    #[serde(default)]
    pub family: DeviceFamily,
}

impl DeviceSpec {
    /// Create a catalog entry
    pub fn new(
        vendor_id: impl Into<String>,
        device_id: impl Into<String>,
        resource_name: impl Into<String>,
        driver: impl Into<String>,
        family: DeviceFamily,
    ) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            device_id: device_id.into(),
            resource_name: resource_name.into(),
            driver: driver.into(),
            family,
        }
    }

    /// `vendor:device` in lspci notation
    pub fn pci_id(&self) -> String {
        format!("{}:{}", self.vendor_id, self.device_id)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.resource_name,
            self.pci_id(),
            self.driver
        )
    }
}

/// The built-in catalog
pub fn default_catalog() -> Vec<DeviceSpec> {
    vec![
        DeviceSpec::new("8086", "158b", "intelxxv710", "iavf", DeviceFamily::Vfio),
        DeviceSpec::new("8086", "1572", "intelx710", "iavf", DeviceFamily::Netdevice),
        DeviceSpec::new(
            "15b3",
            "1015",
            "mlnxconnectx4lx",
            "mlx5_core",
            DeviceFamily::Netdevice,
        ),
        DeviceSpec::new(
            "15b3",
            "1017",
            "mlnxconnectx5",
            "mlx5_core",
            DeviceFamily::Netdevice,
        ),
    ]
}

/// Whether `id` is a four-digit hexadecimal PCI identifier
pub fn is_pci_id(id: &str) -> bool {
    id.len() == 4 && id.chars().all(|c| c.is_ascii_hexdigit())
}
