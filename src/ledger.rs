//! Resource Ledger - what was provisioned, and where
//!
//! The ledger is filled during the provisioning phase only and is the sole
//! input of every later phase. An empty ledger means no capable hardware was
//! found and the run is skipped.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::catalog::DeviceFamily;

/// One successfully provisioned (node, resource) pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Node the VFs were created on
    pub node_name: String,
    /// Logical resource name of the device
    pub resource_name: String,
    /// Number of VFs created
    pub vf_count: u32,
    /// Consumption family of the device
    pub family: DeviceFamily,
}

impl ResourceRecord {
    /// Create a record
    pub fn new(
        node_name: impl Into<String>,
        resource_name: impl Into<String>,
        vf_count: u32,
        family: DeviceFamily,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            resource_name: resource_name.into(),
            vf_count,
            family,
        }
    }
}

/// Append-only sequence of [`ResourceRecord`]s
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    records: Vec<ResourceRecord>,
}

impl ResourceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    pub fn record(&mut self, record: ResourceRecord) {
        self.records.push(record);
    }

    /// All records in provisioning order
    pub fn all(&self) -> &[ResourceRecord] {
        &self.records
    }

    /// Whether nothing was provisioned
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Distinct resource names, sorted
    pub fn resource_names(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.resource_name.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Consume the ledger, returning its records
    pub fn into_records(self) -> Vec<ResourceRecord> {
        self.records
    }
}
