//! Collaborator contracts consumed by the orchestrator.
//!
//! Every capability is an object-safe trait so the orchestrator can hold it
//! as `Arc<dyn …>` and tests can swap in the simulated cloud.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::types::*;

/// VM lifecycle.
#[async_trait]
pub trait VmService: Send + Sync {
    async fn create(&self, request: &CreateVmRequest) -> CloudResult<Vm>;

    async fn start(&self, vm_id: &str) -> CloudResult<Vm>;

    async fn stop(&self, vm_id: &str) -> CloudResult<Vm>;

    /// Destroy a VM; the returned VM is in [`VmState::Expunging`] on success.
    async fn destroy(&self, vm_id: &str) -> CloudResult<Vm>;

    async fn expunge(&self, vm_id: &str) -> CloudResult<Vm>;

    /// Change the offering of a VM in place.
    async fn resize(&self, vm_id: &str, offering_id: &str) -> CloudResult<Vm>;

    /// `None` when the VM never existed.
    async fn get(&self, vm_id: &str) -> CloudResult<Option<Vm>>;
}

#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn create_isolated_network(&self, request: &CreateNetworkRequest)
    -> CloudResult<Network>;

    async fn get_network(&self, network_id: &str) -> CloudResult<Option<Network>>;

    /// Implement the network in a zone so VMs can be placed on it.
    async fn start_network(&self, network_id: &str, zone_id: &str) -> CloudResult<Network>;

    /// Returns false when the infrastructure refused to destroy it.
    async fn destroy_network(&self, network_id: &str) -> CloudResult<bool>;

    /// Reserve a free guest IP on the network.
    async fn acquire_guest_ip(&self, network_id: &str) -> CloudResult<String>;

    async fn list_public_ips(&self, network_id: &str) -> CloudResult<Vec<PublicIp>>;
}

#[async_trait]
pub trait FirewallService: Send + Sync {
    async fn create_ingress_rule(&self, request: &IngressRuleRequest) -> CloudResult<IngressRule>;

    async fn list_ingress_rules(&self, public_ip_id: &str) -> CloudResult<Vec<IngressRule>>;

    async fn revoke_ingress_rule(&self, rule_id: &str) -> CloudResult<()>;

    async fn create_port_forward(&self, request: &PortForwardRequest) -> CloudResult<PortForward>;

    async fn list_port_forwards(&self, public_ip_id: &str) -> CloudResult<Vec<PortForward>>;

    async fn remove_port_forward(&self, rule_id: &str) -> CloudResult<()>;

    /// Push pending rule changes on a public IP to the edge.
    async fn apply_rules(&self, public_ip_id: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn issue(&self, request: &CertificateRequest) -> CloudResult<CertificateBundle>;
}

/// Authenticated remote command execution (SSH in production).
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn execute(&self, command: &RemoteCommand) -> CloudResult<CommandOutput>;
}

#[async_trait]
pub trait BootMediaService: Send + Sync {
    async fn find_media(&self, name: &str) -> CloudResult<Option<BootMedia>>;

    async fn attach(&self, media_id: &str, vm_id: &str) -> CloudResult<()>;

    async fn detach(&self, vm_id: &str) -> CloudResult<()>;
}

/// Read-only service settings (template names, boot-config paths, …).
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Host capacity for placement checks.
#[async_trait]
pub trait HostInventory: Send + Sync {
    async fn list_hosts(&self, zone_id: &str) -> CloudResult<Vec<HostCapacity>>;
}

/// Lookups of zones, offerings, templates and key pairs.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn zone(&self, zone_id: &str) -> CloudResult<Option<Zone>>;

    async fn service_offering(&self, offering_id: &str) -> CloudResult<Option<ServiceOffering>>;

    async fn template_by_name(&self, name: &str) -> CloudResult<Option<Template>>;

    async fn ssh_key_pair(&self, account_id: &str, name: &str) -> CloudResult<Option<SshKeyPair>>;
}

/// TCP reachability of an endpoint.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool;
}
