//! sriov-harness - SR-IOV virtual function provisioning and verification
//!
//! A run provisions VFs on every capable worker node, installs the
//! cluster-side stack that exposes them to workloads, verifies that a
//! workload can actually consume them, and then undoes everything it did,
//! whatever the outcome.
//!
//! # Modules
//!
//! - [`catalog`] - Device Catalog (known NIC families)
//! - [`probe`] - Provisioning Probe and the node debug pod
//! - [`ledger`] - Resource Ledger (what was provisioned, where)
//! - [`poll`] - Readiness Poller
//! - [`install`] - Infrastructure Installer
//! - [`teardown`] - Teardown Stack
//! - [`verify`] - Consumption Verifier
//! - [`workflow`] - Workflow Driver state machine
//! - [`markers`] - Script output classification
//! - [`exec`], [`apply`], [`status`] - Cluster collaborators
//! - [`config`] - Run configuration
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod apply;
pub mod catalog;
pub mod config;
pub mod error;
pub mod exec;
pub mod install;
pub mod kubectl;
pub mod ledger;
pub mod markers;
pub mod poll;
pub mod probe;
pub mod retry;
pub mod status;
pub mod teardown;
pub mod verify;
pub mod workflow;

pub use error::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
