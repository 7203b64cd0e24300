//! Integration tests against a real cluster
//!
//! # Test Organization
//!
//! - `cluster_status`: the kube-backed status queries and node labeling
//! - `full_run`: a complete provisioning run on real hardware
//!
//! # Running These Tests
//!
//! ```bash
//! # Collaborator stories (any cluster, e.g. kind)
//! cargo test --test kind cluster_status -- --ignored
//!
//! # Full run (SR-IOV workers required)
//! SRIOV_HARNESS_CONFIG=harness.yaml cargo test --test kind full_run -- --ignored --nocapture
//! ```

mod cluster_status;
mod full_run;
mod helpers;
