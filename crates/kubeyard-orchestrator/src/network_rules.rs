//! Firewall and port-forwarding rules on a cluster's public IP.
//!
//! Layout: one ingress rule for the API port, one ingress rule spanning the
//! SSH range `2222..=2222+n-1` where `n` is one past the highest map index,
//! a forward of the API port to the master, and a forward of `2222 + index`
//! to port 22 of the VM at map index `index`.

use tracing::{debug, info};

use kubeyard_cloud::{
    CloudError, FirewallService, IngressRuleRequest, NetworkService, PortForwardRequest, Protocol,
    PublicIp, Vm,
};
use kubeyard_core::{API_SERVER_PORT, GUEST_SSH_PORT, SSH_BASE_PORT, ssh_port_for_index, ssh_port_range};
use kubeyard_state::ClusterVmMapping;

use crate::error::{OrchestratorError, OrchestratorResult};

const ANY_SOURCE: &str = "0.0.0.0/0";

/// First public IP of the network; clusters are addressed through it.
pub async fn cluster_public_ip(
    networks: &dyn NetworkService,
    network_id: &str,
) -> OrchestratorResult<PublicIp> {
    networks
        .list_public_ips(network_id)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            OrchestratorError::Validation(format!("network {network_id} has no public IP"))
        })
}

pub fn guest_ip(vm: &Vm) -> OrchestratorResult<&str> {
    vm.private_ip.as_deref().ok_or_else(|| {
        OrchestratorError::Cloud(CloudError::Rejected(format!("vm {} has no guest IP", vm.id)))
    })
}

fn ingress(public_ip: &PublicIp, start_port: u16, end_port: u16) -> IngressRuleRequest {
    IngressRuleRequest {
        public_ip_id: public_ip.id.clone(),
        protocol: Protocol::Tcp,
        start_port,
        end_port,
        cidrs: vec![ANY_SOURCE.to_string()],
    }
}

/// Number of SSH ports needed to reach every mapped VM.
pub fn ssh_span(mappings: &[ClusterVmMapping]) -> u32 {
    mappings.iter().map(|m| m.index + 1).max().unwrap_or(0)
}

/// Open the API and SSH ports for freshly provisioned VMs.
///
/// `vms` holds `(map index, vm)` pairs; index 0 is the master.
pub async fn open_cluster_rules(
    firewall: &dyn FirewallService,
    public_ip: &PublicIp,
    vms: &[(u32, Vm)],
) -> OrchestratorResult<()> {
    let (_, master) = vms
        .iter()
        .find(|(index, _)| *index == 0)
        .ok_or_else(|| OrchestratorError::Validation("no master VM to expose".into()))?;

    firewall
        .create_ingress_rule(&ingress(public_ip, API_SERVER_PORT, API_SERVER_PORT))
        .await?;
    let span = vms.iter().map(|(index, _)| index + 1).max().unwrap_or(0);
    let ssh = ssh_port_range(span);
    firewall
        .create_ingress_rule(&ingress(public_ip, *ssh.start(), *ssh.end()))
        .await?;

    firewall
        .create_port_forward(&PortForwardRequest {
            public_ip_id: public_ip.id.clone(),
            public_port: API_SERVER_PORT,
            vm_id: master.id.clone(),
            private_ip: guest_ip(master)?.to_string(),
            private_port: API_SERVER_PORT,
            protocol: Protocol::Tcp,
        })
        .await?;
    add_ssh_forwards(firewall, public_ip, vms).await?;

    firewall.apply_rules(&public_ip.id).await?;
    info!(
        ip = %public_ip.address,
        ssh_ports = %format!("{}-{}", ssh.start(), ssh.end()),
        "cluster rules opened"
    );
    Ok(())
}

/// Forward `2222 + index` to each VM's SSH port. Rules are not applied.
pub async fn add_ssh_forwards(
    firewall: &dyn FirewallService,
    public_ip: &PublicIp,
    vms: &[(u32, Vm)],
) -> OrchestratorResult<()> {
    for (index, vm) in vms {
        let public_port = ssh_port_for_index(*index);
        firewall
            .create_port_forward(&PortForwardRequest {
                public_ip_id: public_ip.id.clone(),
                public_port,
                vm_id: vm.id.clone(),
                private_ip: guest_ip(vm)?.to_string(),
                private_port: GUEST_SSH_PORT,
                protocol: Protocol::Tcp,
            })
            .await?;
        debug!(vm = %vm.id, public_port, "ssh forward added");
    }
    Ok(())
}

/// Replace the SSH ingress rule with one covering `span` ports and apply.
pub async fn rescale_ssh_range(
    firewall: &dyn FirewallService,
    public_ip: &PublicIp,
    span: u32,
) -> OrchestratorResult<()> {
    for rule in firewall.list_ingress_rules(&public_ip.id).await? {
        if rule.start_port == SSH_BASE_PORT {
            firewall.revoke_ingress_rule(&rule.id).await?;
        }
    }
    let ssh = ssh_port_range(span);
    firewall
        .create_ingress_rule(&ingress(public_ip, *ssh.start(), *ssh.end()))
        .await?;
    firewall.apply_rules(&public_ip.id).await?;
    info!(ip = %public_ip.address, start = *ssh.start(), end = *ssh.end(), "ssh range rescaled");
    Ok(())
}

/// Drop the SSH forward of one VM and apply.
pub async fn remove_ssh_forward(
    firewall: &dyn FirewallService,
    public_ip: &PublicIp,
    vm_id: &str,
) -> OrchestratorResult<()> {
    for rule in firewall.list_port_forwards(&public_ip.id).await? {
        if rule.vm_id == vm_id && rule.private_port == GUEST_SSH_PORT {
            firewall.remove_port_forward(&rule.id).await?;
        }
    }
    firewall.apply_rules(&public_ip.id).await?;
    Ok(())
}

/// True when an ingress rule or forward on the IP already claims the API port.
pub async fn api_port_taken(
    firewall: &dyn FirewallService,
    public_ip: &PublicIp,
) -> OrchestratorResult<bool> {
    let ingress_taken = firewall
        .list_ingress_rules(&public_ip.id)
        .await?
        .iter()
        .any(|r| r.start_port <= API_SERVER_PORT && API_SERVER_PORT <= r.end_port);
    if ingress_taken {
        return Ok(true);
    }
    Ok(firewall
        .list_port_forwards(&public_ip.id)
        .await?
        .iter()
        .any(|r| r.public_port == API_SERVER_PORT))
}
