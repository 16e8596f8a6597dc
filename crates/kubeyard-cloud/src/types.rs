//! Request and response values exchanged with infrastructure collaborators.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Catalog ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

/// Compute offering a VM is sized from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub cpu: u32,
    pub speed_mhz: u32,
    pub ram_mb: u64,
    /// Custom offerings leave cpu/ram to the caller.
    pub dynamic: bool,
}

impl ServiceOffering {
    /// Aggregate cpu of one instance: cpu count × speed.
    pub fn cpu_mhz(&self) -> u64 {
        self.cpu as u64 * self.speed_mhz as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub zone_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub name: String,
    pub account_id: String,
    pub public_key: String,
}

/// Host capacity as seen by placement, with the overcommit ratios of its
/// host cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub id: String,
    pub zone_id: String,
    pub cpu_total_mhz: u64,
    pub cpu_used_mhz: u64,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub cpu_overcommit: f64,
    pub memory_overcommit: f64,
}

// ── VMs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroyed,
    Expunging,
    Error,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hypervisor {
    XenServer,
    VMware,
    Kvm,
    HyperV,
    Simulator,
}

impl Hypervisor {
    /// Whether a running VM can change offering without a restart.
    pub fn supports_live_resize(&self) -> bool {
        matches!(
            self,
            Hypervisor::XenServer | Hypervisor::VMware | Hypervisor::Simulator
        )
    }
}

impl fmt::Display for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub state: VmState,
    pub private_ip: Option<String>,
    pub network_id: String,
    pub offering_id: String,
    pub hypervisor: Hypervisor,
    /// Removal finalized by the infrastructure layer.
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVmRequest {
    pub name: String,
    pub hostname: String,
    pub zone_id: String,
    pub offering_id: String,
    pub template_id: String,
    pub network_id: String,
    pub account_id: String,
    pub domain_id: String,
    /// Base64 boot configuration.
    pub user_data: String,
    pub ssh_key_pair: Option<String>,
    /// Pin the guest IP (used for the master).
    pub requested_ip: Option<String>,
}

// ── Networks ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkState {
    Allocated,
    Implemented,
    Shutdown,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub zone_id: String,
    pub account_id: String,
    pub isolated: bool,
    pub state: NetworkState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub offering_name: String,
    pub zone_id: String,
    pub account_id: String,
    pub domain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIp {
    pub id: String,
    pub address: String,
    pub network_id: String,
}

// ── Rules ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRuleRequest {
    pub public_ip_id: String,
    pub protocol: Protocol,
    pub start_port: u16,
    pub end_port: u16,
    pub cidrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub id: String,
    pub public_ip_id: String,
    pub protocol: Protocol,
    pub start_port: u16,
    pub end_port: u16,
    pub cidrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardRequest {
    pub public_ip_id: String,
    pub public_port: u16,
    pub vm_id: String,
    pub private_ip: String,
    pub private_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub id: String,
    pub public_ip_id: String,
    pub public_port: u16,
    pub vm_id: String,
    pub private_ip: String,
    pub private_port: u16,
    pub protocol: Protocol,
}

// ── Certificates ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub hostnames: Vec<String>,
    pub ips: Vec<String>,
    pub validity_days: u32,
}

/// PEM material for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub certificate: String,
    pub private_key: String,
    pub ca_chain: Vec<String>,
}

// ── Remote execution ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_file: Option<PathBuf>,
    pub command: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

// ── Boot media ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootMedia {
    pub id: String,
    pub name: String,
}
