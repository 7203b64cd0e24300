//! Output markers of the node scripts and workload inspection commands
//!
//! `provision_sriov.sh` and `bind_dpdk.sh` report their outcome as text.
//! The exact substrings below are a contract with those scripts; nothing
//! else in the crate matches on command output.

/// Printed by `provision_sriov.sh` when VFs were created
pub const PROVISION_SUCCESS: &str = "successfully configured";
/// Printed by `provision_sriov.sh` when VF creation failed
pub const PROVISION_FAILURE: &str = "failed to configure";
/// Printed by `bind_dpdk.sh -b` when VFs were bound to vfio-pci
pub const BIND_SUCCESS: &str = "successfully bind";
/// Printed by `bind_dpdk.sh -b` when binding failed
pub const BIND_FAILURE: &str = "failed to bind";
/// Printed by `bind_dpdk.sh -u` when VFs were released
pub const UNBIND_SUCCESS: &str = "successfully unbind";
/// Printed by `bind_dpdk.sh -u` when releasing failed
pub const UNBIND_FAILURE: &str = "failed to unbind";

/// `ip link` output for a missing interface
pub const INTERFACE_MISSING: &str = "does not exist";
/// `ls` output for a missing path
pub const FILE_MISSING: &str = "No such file";

/// What a node script reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptResult {
    /// The script did what it was asked
    Success,
    /// The script tried and failed
    Failure,
    /// Nothing applicable on this node
    NotApplicable,
}

fn classify(output: &str, success: &str, failure: &str) -> ScriptResult {
    if output.contains(success) {
        ScriptResult::Success
    } else if output.contains(failure) {
        ScriptResult::Failure
    } else {
        ScriptResult::NotApplicable
    }
}

/// Classify `provision_sriov.sh` output
pub fn classify_provision(output: &str) -> ScriptResult {
    classify(output, PROVISION_SUCCESS, PROVISION_FAILURE)
}

/// Classify `bind_dpdk.sh -b` output
pub fn classify_bind(output: &str) -> ScriptResult {
    classify(output, BIND_SUCCESS, BIND_FAILURE)
}

/// Classify `bind_dpdk.sh -u` output
pub fn classify_unbind(output: &str) -> ScriptResult {
    classify(output, UNBIND_SUCCESS, UNBIND_FAILURE)
}

/// MTU reported by `ip link show dev <iface>`, if the interface exists
pub fn link_mtu(output: &str) -> Option<u32> {
    if output.contains(INTERFACE_MISSING) {
        return None;
    }
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "mtu" {
            return tokens.next().and_then(|v| v.parse().ok());
        }
    }
    None
}

/// Listing of `/dev/vfio`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VfioListing {
    /// The `vfio` container device is present
    pub has_container: bool,
    /// Number of numbered IOMMU group files
    pub groups: usize,
}

/// Parse `ls /dev/vfio` output, `None` if the directory is missing
pub fn vfio_listing(output: &str) -> Option<VfioListing> {
    if output.contains(FILE_MISSING) {
        return None;
    }
    let mut listing = VfioListing::default();
    for entry in output.split_whitespace() {
        let entry = entry.trim_start_matches("/dev/vfio/");
        if entry == "vfio" {
            listing.has_container = true;
        } else if entry.parse::<u32>().is_ok() {
            listing.groups += 1;
        }
    }
    Some(listing)
}
