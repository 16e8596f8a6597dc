//! Fixed network layout of a managed cluster.

use std::ops::RangeInclusive;

/// Kubernetes API server port, opened on the public IP and forwarded to the master.
pub const API_SERVER_PORT: u16 = 6443;

/// First public port of the SSH forwarding range. VM at map index `i` is
/// reachable on `SSH_BASE_PORT + i`.
pub const SSH_BASE_PORT: u16 = 2222;

/// SSH port inside each guest.
pub const GUEST_SSH_PORT: u16 = 22;

/// Remote user on the cluster images.
pub const DEFAULT_SSH_USER: &str = "core";

/// Add-on workload whose readiness completes a cold start.
pub const DASHBOARD_ADDON: &str = "kubernetes-dashboard";

/// Public port forwarding SSH to the VM at `index` in the cluster map.
pub fn ssh_port_for_index(index: u32) -> u16 {
    SSH_BASE_PORT + index as u16
}

/// Public SSH port range covering `vm_count` mapped VMs.
///
/// Always starts at [`SSH_BASE_PORT`]; `vm_count` of zero still yields the base port.
pub fn ssh_port_range(vm_count: u32) -> RangeInclusive<u16> {
    SSH_BASE_PORT..=SSH_BASE_PORT + vm_count.saturating_sub(1) as u16
}
