//! Domain types for the Kubeyard state store.
//!
//! A cluster is persisted as three records: the [`ClusterRecord`] itself, its
//! one-to-one [`ClusterDetails`], and an ordered list of
//! [`ClusterVmMapping`] entries where index 0 is always the master VM.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a cluster (UUID string).
pub type ClusterId = String;

/// Identifier of a VM in the infrastructure layer.
pub type VmId = String;

// ── Lifecycle ─────────────────────────────────────────────────────

/// Lifecycle state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Scaling,
    Alert,
    Recovering,
    Destroying,
    Destroyed,
    Error,
}

impl ClusterState {
    pub const ALL: [ClusterState; 11] = [
        ClusterState::Created,
        ClusterState::Starting,
        ClusterState::Running,
        ClusterState::Stopping,
        ClusterState::Stopped,
        ClusterState::Scaling,
        ClusterState::Alert,
        ClusterState::Recovering,
        ClusterState::Destroying,
        ClusterState::Destroyed,
        ClusterState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Created => "Created",
            ClusterState::Starting => "Starting",
            ClusterState::Running => "Running",
            ClusterState::Stopping => "Stopping",
            ClusterState::Stopped => "Stopped",
            ClusterState::Scaling => "Scaling",
            ClusterState::Alert => "Alert",
            ClusterState::Recovering => "Recovering",
            ClusterState::Destroying => "Destroying",
            ClusterState::Destroyed => "Destroyed",
            ClusterState::Error => "Error",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterEvent {
    StartRequested,
    StopRequested,
    ScaleUpRequested,
    ScaleDownRequested,
    DestroyRequested,
    OperationSucceeded,
    OperationFailed,
    CreateFailed,
    FaultsDetected,
    RecoveryRequested,
}

impl ClusterEvent {
    pub const ALL: [ClusterEvent; 10] = [
        ClusterEvent::StartRequested,
        ClusterEvent::StopRequested,
        ClusterEvent::ScaleUpRequested,
        ClusterEvent::ScaleDownRequested,
        ClusterEvent::DestroyRequested,
        ClusterEvent::OperationSucceeded,
        ClusterEvent::OperationFailed,
        ClusterEvent::CreateFailed,
        ClusterEvent::FaultsDetected,
        ClusterEvent::RecoveryRequested,
    ];
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// Account and domain owning a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub account_id: String,
    pub domain_id: String,
}

/// Persisted cluster record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub name: String,
    pub description: String,
    pub zone_id: String,
    pub service_offering_id: String,
    pub template_id: String,
    pub network_id: String,
    pub owner: Owner,
    /// Worker node count; the master is not included.
    pub node_count: u32,
    /// cpu count × node count of the current offering.
    pub cores: u64,
    /// ram (MiB) × node count of the current offering.
    pub memory_mb: u64,
    pub state: ClusterState,
    pub ssh_key_pair: Option<String>,
    /// `https://<public ip>:6443/` once the API server answered.
    pub endpoint: Option<String>,
    pub console_endpoint: Option<String>,
    /// Set while a teardown is incomplete and waiting for the collector.
    pub gc_pending: bool,
    pub created_at: u64,
    pub updated_at: u64,
    /// Soft-delete timestamp.
    pub removed_at: Option<u64>,
}

impl ClusterRecord {
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// Number of VMs a healthy cluster maps: every node plus the master.
    pub fn expected_vm_count(&self) -> usize {
        self.node_count as usize + 1
    }
}

/// Private registry credentials injected into node boot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub url: String,
    pub email: String,
}

/// One-to-one companion of a [`ClusterRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterDetails {
    pub cluster_id: ClusterId,
    pub registry: Option<RegistryCredentials>,
    pub admin_username: String,
    pub admin_password: String,
    /// Admin kubeconfig, base64 encoded.
    pub kube_config: Option<String>,
    /// Destroy the network on teardown (it was created for this cluster).
    pub network_cleanup: bool,
}

// ── VM mapping ────────────────────────────────────────────────────

/// A single cluster → VM association.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterVmMapping {
    pub cluster_id: ClusterId,
    /// Provisioning order; 0 is the master.
    pub index: u32,
    pub vm_id: VmId,
}

impl ClusterVmMapping {
    /// Build the composite key for the VM mapping table.
    pub fn table_key(&self) -> String {
        vm_key(&self.cluster_id, self.index)
    }

    pub fn is_master(&self) -> bool {
        self.index == 0
    }
}

pub(crate) fn vm_key(cluster_id: &str, index: u32) -> String {
    format!("{cluster_id}:{index:06}")
}

pub(crate) fn vm_prefix(cluster_id: &str) -> String {
    format!("{cluster_id}:")
}
