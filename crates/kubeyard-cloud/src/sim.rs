//! In-memory cloud implementing every collaborator contract.
//!
//! Models just enough of an IaaS platform for end-to-end workflows: VMs with
//! guest IPs and states, isolated networks with a source-NAT public IP,
//! ingress and port-forward rules, boot media attachments, and a remote
//! shell that answers the handful of `kubectl` commands the workflows send.
//!
//! Remote commands and reachability are routed the way the real edge routes
//! them: the public IP's port-forward rules decide which VM a connection
//! lands on, so missing rules make the cluster unreachable.
//!
//! Faults can be injected per operation for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use kubeyard_core::{API_SERVER_PORT, DASHBOARD_ADDON};

use crate::error::{CloudError, CloudResult};
use crate::traits::*;
use crate::types::*;

#[derive(Default)]
struct Faults {
    /// VM creation fails when the VM name contains any of these.
    create: Vec<String>,
    start: HashSet<String>,
    destroy: HashSet<String>,
    resize: HashSet<String>,
    network_destroy: bool,
    api_unreachable: bool,
    addon_pending: bool,
    /// Nodes that never report Ready.
    not_ready: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    zones: HashMap<String, Zone>,
    offerings: HashMap<String, ServiceOffering>,
    templates: Vec<Template>,
    key_pairs: Vec<SshKeyPair>,
    hosts: Vec<HostCapacity>,
    networks: HashMap<String, Network>,
    public_ips: Vec<PublicIp>,
    guest_ips: HashMap<String, u32>,
    vms: BTreeMap<String, Vm>,
    ingress: Vec<IngressRule>,
    forwards: Vec<PortForward>,
    media: Vec<BootMedia>,
    attached: HashMap<String, String>,
    /// Hostnames removed from the Kubernetes node list.
    deleted_nodes: HashSet<String>,
    commands: Vec<RemoteCommand>,
    hypervisor: Option<Hypervisor>,
    faults: Faults,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn vm_mut(&mut self, vm_id: &str) -> CloudResult<&mut Vm> {
        self.vms
            .get_mut(vm_id)
            .filter(|vm| !vm.removed)
            .ok_or_else(|| CloudError::not_found("vm", vm_id))
    }

    fn public_ip_by_address(&self, address: &str) -> Option<&PublicIp> {
        self.public_ips.iter().find(|ip| ip.address == address)
    }

    /// The live VM a connection to `address:port` is forwarded to.
    fn forwarded_vm(&self, address: &str, port: u16) -> Option<&Vm> {
        let ip = self.public_ip_by_address(address)?;
        let rule = self
            .forwards
            .iter()
            .find(|r| r.public_ip_id == ip.id && r.public_port == port)?;
        self.vms
            .get(&rule.vm_id)
            .filter(|vm| !vm.removed && vm.state == VmState::Running)
    }

    fn ready_node_count(&self, network_id: &str) -> usize {
        self.vms
            .values()
            .filter(|vm| {
                vm.network_id == network_id
                    && !vm.removed
                    && vm.state == VmState::Running
                    && !self.deleted_nodes.contains(&vm.hostname)
                    && !self.faults.not_ready.contains(&vm.hostname)
            })
            .count()
    }
}

/// In-memory cloud. See the module docs.
#[derive(Default)]
pub struct SimulatedCloud {
    inner: Mutex<Inner>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cloud with one enabled zone, a few offerings, the cluster template,
    /// the bootstrap ISO and four hosts.
    pub async fn sandbox() -> Self {
        let cloud = Self::new();
        cloud
            .add_zone(Zone {
                id: "zone-1".into(),
                name: "sandbox".into(),
                enabled: true,
            })
            .await;
        for (id, cpu, speed, ram) in [
            ("small", 1, 1000, 2048),
            ("medium", 2, 1000, 4096),
            ("large", 4, 2000, 8192),
        ] {
            cloud
                .add_offering(ServiceOffering {
                    id: id.into(),
                    name: id.into(),
                    cpu,
                    speed_mhz: speed,
                    ram_mb: ram,
                    dynamic: false,
                })
                .await;
        }
        cloud
            .add_template(Template {
                id: "tmpl-coreos".into(),
                name: "coreos-kubernetes".into(),
                zone_id: "zone-1".into(),
            })
            .await;
        cloud.add_media("k8s-bootstrap").await;
        for i in 1..=4 {
            cloud
                .add_host(HostCapacity {
                    id: format!("host-{i}"),
                    zone_id: "zone-1".into(),
                    cpu_total_mhz: 16_000,
                    cpu_used_mhz: 0,
                    memory_total_mb: 32_768,
                    memory_used_mb: 0,
                    cpu_overcommit: 1.0,
                    memory_overcommit: 1.0,
                })
                .await;
        }
        cloud
    }

    // ── Seeding ───────────────────────────────────────────────────

    pub async fn add_zone(&self, zone: Zone) {
        self.inner.lock().await.zones.insert(zone.id.clone(), zone);
    }

    pub async fn add_offering(&self, offering: ServiceOffering) {
        self.inner
            .lock()
            .await
            .offerings
            .insert(offering.id.clone(), offering);
    }

    pub async fn add_template(&self, template: Template) {
        self.inner.lock().await.templates.push(template);
    }

    pub async fn add_key_pair(&self, key_pair: SshKeyPair) {
        self.inner.lock().await.key_pairs.push(key_pair);
    }

    pub async fn add_host(&self, host: HostCapacity) {
        self.inner.lock().await.hosts.push(host);
    }

    pub async fn add_media(&self, name: &str) -> BootMedia {
        let mut inner = self.inner.lock().await;
        let media = BootMedia {
            id: inner.next_id("iso"),
            name: name.to_string(),
        };
        inner.media.push(media.clone());
        media
    }

    /// Hypervisor reported for VMs created from now on.
    pub async fn set_hypervisor(&self, hypervisor: Hypervisor) {
        self.inner.lock().await.hypervisor = Some(hypervisor);
    }

    // ── Fault injection ───────────────────────────────────────────

    /// Fail creation of any VM whose name contains `pattern`.
    pub async fn fail_vm_create(&self, pattern: &str) {
        self.inner.lock().await.faults.create.push(pattern.to_string());
    }

    pub async fn fail_vm_start(&self, vm_id: &str) {
        self.inner.lock().await.faults.start.insert(vm_id.to_string());
    }

    pub async fn fail_vm_destroy(&self, vm_id: &str, fail: bool) {
        let mut inner = self.inner.lock().await;
        if fail {
            inner.faults.destroy.insert(vm_id.to_string());
        } else {
            inner.faults.destroy.remove(vm_id);
        }
    }

    pub async fn fail_vm_resize(&self, vm_id: &str) {
        self.inner.lock().await.faults.resize.insert(vm_id.to_string());
    }

    pub async fn fail_network_destroy(&self, fail: bool) {
        self.inner.lock().await.faults.network_destroy = fail;
    }

    pub async fn set_api_reachable(&self, reachable: bool) {
        self.inner.lock().await.faults.api_unreachable = !reachable;
    }

    pub async fn set_addon_ready(&self, ready: bool) {
        self.inner.lock().await.faults.addon_pending = !ready;
    }

    /// Keep a node out of the Ready count.
    pub async fn hold_node_not_ready(&self, hostname: &str) {
        self.inner
            .lock()
            .await
            .faults
            .not_ready
            .insert(hostname.to_string());
    }

    /// Force a VM's state from outside, as a crash or operator action would.
    pub async fn set_vm_state(&self, vm_id: &str, state: VmState) -> CloudResult<()> {
        let mut inner = self.inner.lock().await;
        inner.vm_mut(vm_id)?.state = state;
        Ok(())
    }

    // ── Inspection ────────────────────────────────────────────────

    pub async fn vm(&self, vm_id: &str) -> Option<Vm> {
        self.inner.lock().await.vms.get(vm_id).cloned()
    }

    /// VMs not yet expunged.
    pub async fn live_vms(&self) -> Vec<Vm> {
        self.inner
            .lock()
            .await
            .vms
            .values()
            .filter(|vm| !vm.removed)
            .cloned()
            .collect()
    }

    pub async fn network(&self, network_id: &str) -> Option<Network> {
        self.inner.lock().await.networks.get(network_id).cloned()
    }

    pub async fn ingress_rules(&self) -> Vec<IngressRule> {
        self.inner.lock().await.ingress.clone()
    }

    pub async fn port_forwards(&self) -> Vec<PortForward> {
        self.inner.lock().await.forwards.clone()
    }

    pub async fn attached_media(&self) -> HashMap<String, String> {
        self.inner.lock().await.attached.clone()
    }

    pub async fn commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .commands
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Pre-existing isolated network with a public IP, owned by `account_id`.
    pub async fn add_network(&self, name: &str, zone_id: &str, account_id: &str) -> Network {
        let mut inner = self.inner.lock().await;
        create_network(&mut inner, name, zone_id, account_id)
    }
}

fn create_network(inner: &mut Inner, name: &str, zone_id: &str, account_id: &str) -> Network {
    let network = Network {
        id: inner.next_id("net"),
        name: name.to_string(),
        zone_id: zone_id.to_string(),
        account_id: account_id.to_string(),
        isolated: true,
        state: NetworkState::Allocated,
    };
    let octet = inner.public_ips.len() + 10;
    let ip = PublicIp {
        id: inner.next_id("ip"),
        address: format!("203.0.113.{octet}"),
        network_id: network.id.clone(),
    };
    inner.public_ips.push(ip);
    inner.guest_ips.insert(network.id.clone(), 10);
    inner.networks.insert(network.id.clone(), network.clone());
    network
}

fn kubeconfig_for(master_ip: &str) -> String {
    format!(
        "apiVersion: v1\n\
         clusters:\n\
         - cluster:\n\
         \x20   certificate-authority-data: c2FuZGJveA==\n\
         \x20   server: https://{master_ip}:{port}\n\
         \x20 name: kubernetes\n\
         contexts:\n\
         - context:\n\
         \x20   cluster: kubernetes\n\
         \x20   user: kubernetes-admin\n\
         \x20 name: kubernetes-admin@kubernetes\n\
         current-context: kubernetes-admin@kubernetes\n\
         kind: Config\n",
        port = API_SERVER_PORT,
    )
}

#[async_trait]
impl VmService for SimulatedCloud {
    async fn create(&self, request: &CreateVmRequest) -> CloudResult<Vm> {
        let mut inner = self.inner.lock().await;
        if inner
            .faults
            .create
            .iter()
            .any(|pattern| request.name.contains(pattern.as_str()))
        {
            return Err(CloudError::InsufficientCapacity(format!(
                "no host can fit {}",
                request.name
            )));
        }
        if !inner.networks.contains_key(&request.network_id) {
            return Err(CloudError::not_found("network", &request.network_id));
        }
        let private_ip = match &request.requested_ip {
            Some(ip) => ip.clone(),
            None => {
                let next = inner.guest_ips.entry(request.network_id.clone()).or_insert(10);
                *next += 1;
                format!("10.1.1.{next}")
            }
        };
        let vm = Vm {
            id: inner.next_id("vm"),
            name: request.name.clone(),
            hostname: request.hostname.clone(),
            state: VmState::Stopped,
            private_ip: Some(private_ip),
            network_id: request.network_id.clone(),
            offering_id: request.offering_id.clone(),
            hypervisor: inner.hypervisor.unwrap_or(Hypervisor::Simulator),
            removed: false,
        };
        // A recycled hostname joins as a fresh node.
        inner.deleted_nodes.remove(&vm.hostname);
        inner.vms.insert(vm.id.clone(), vm.clone());
        debug!(vm = %vm.id, name = %vm.name, "simulated vm created");
        Ok(vm)
    }

    async fn start(&self, vm_id: &str) -> CloudResult<Vm> {
        let mut inner = self.inner.lock().await;
        if inner.faults.start.contains(vm_id) {
            return Err(CloudError::Rejected(format!("vm {vm_id} failed to start")));
        }
        let vm = inner.vm_mut(vm_id)?;
        vm.state = VmState::Running;
        Ok(vm.clone())
    }

    async fn stop(&self, vm_id: &str) -> CloudResult<Vm> {
        let mut inner = self.inner.lock().await;
        let vm = inner.vm_mut(vm_id)?;
        vm.state = VmState::Stopped;
        Ok(vm.clone())
    }

    async fn destroy(&self, vm_id: &str) -> CloudResult<Vm> {
        let mut inner = self.inner.lock().await;
        if inner.faults.destroy.contains(vm_id) {
            return Err(CloudError::Rejected(format!("vm {vm_id} refused destroy")));
        }
        let vm = inner
            .vms
            .get_mut(vm_id)
            .ok_or_else(|| CloudError::not_found("vm", vm_id))?;
        vm.state = VmState::Expunging;
        Ok(vm.clone())
    }

    async fn expunge(&self, vm_id: &str) -> CloudResult<Vm> {
        let mut inner = self.inner.lock().await;
        let vm = inner
            .vms
            .get_mut(vm_id)
            .ok_or_else(|| CloudError::not_found("vm", vm_id))?;
        vm.state = VmState::Expunging;
        vm.removed = true;
        let vm = vm.clone();
        inner.attached.remove(vm_id);
        Ok(vm)
    }

    async fn resize(&self, vm_id: &str, offering_id: &str) -> CloudResult<Vm> {
        let mut inner = self.inner.lock().await;
        if inner.faults.resize.contains(vm_id) {
            return Err(CloudError::Rejected(format!("vm {vm_id} resize failed")));
        }
        if !inner.offerings.contains_key(offering_id) {
            return Err(CloudError::not_found("service offering", offering_id));
        }
        let vm = inner.vm_mut(vm_id)?;
        vm.offering_id = offering_id.to_string();
        Ok(vm.clone())
    }

    async fn get(&self, vm_id: &str) -> CloudResult<Option<Vm>> {
        Ok(self.inner.lock().await.vms.get(vm_id).cloned())
    }
}

#[async_trait]
impl NetworkService for SimulatedCloud {
    async fn create_isolated_network(
        &self,
        request: &CreateNetworkRequest,
    ) -> CloudResult<Network> {
        let mut inner = self.inner.lock().await;
        if !inner.zones.contains_key(&request.zone_id) {
            return Err(CloudError::not_found("zone", &request.zone_id));
        }
        Ok(create_network(
            &mut inner,
            &request.name,
            &request.zone_id,
            &request.account_id,
        ))
    }

    async fn get_network(&self, network_id: &str) -> CloudResult<Option<Network>> {
        Ok(self.inner.lock().await.networks.get(network_id).cloned())
    }

    async fn start_network(&self, network_id: &str, _zone_id: &str) -> CloudResult<Network> {
        let mut inner = self.inner.lock().await;
        let network = inner
            .networks
            .get_mut(network_id)
            .ok_or_else(|| CloudError::not_found("network", network_id))?;
        network.state = NetworkState::Implemented;
        Ok(network.clone())
    }

    async fn destroy_network(&self, network_id: &str) -> CloudResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.faults.network_destroy {
            return Ok(false);
        }
        let busy = inner
            .vms
            .values()
            .any(|vm| vm.network_id == network_id && !vm.removed);
        if busy {
            return Ok(false);
        }
        let Some(network) = inner.networks.get_mut(network_id) else {
            return Err(CloudError::not_found("network", network_id));
        };
        network.state = NetworkState::Destroyed;
        let ip_ids: Vec<String> = inner
            .public_ips
            .iter()
            .filter(|ip| ip.network_id == network_id)
            .map(|ip| ip.id.clone())
            .collect();
        inner.ingress.retain(|r| !ip_ids.contains(&r.public_ip_id));
        inner.forwards.retain(|r| !ip_ids.contains(&r.public_ip_id));
        inner.public_ips.retain(|ip| ip.network_id != network_id);
        Ok(true)
    }

    async fn acquire_guest_ip(&self, network_id: &str) -> CloudResult<String> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .guest_ips
            .get_mut(network_id)
            .ok_or_else(|| CloudError::not_found("network", network_id))?;
        *next += 1;
        Ok(format!("10.1.1.{next}"))
    }

    async fn list_public_ips(&self, network_id: &str) -> CloudResult<Vec<PublicIp>> {
        Ok(self
            .inner
            .lock()
            .await
            .public_ips
            .iter()
            .filter(|ip| ip.network_id == network_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FirewallService for SimulatedCloud {
    async fn create_ingress_rule(&self, request: &IngressRuleRequest) -> CloudResult<IngressRule> {
        let mut inner = self.inner.lock().await;
        let overlaps = inner.ingress.iter().any(|r| {
            r.public_ip_id == request.public_ip_id
                && r.start_port <= request.end_port
                && request.start_port <= r.end_port
        });
        if overlaps {
            return Err(CloudError::Rejected(format!(
                "ingress ports {}-{} overlap an existing rule",
                request.start_port, request.end_port
            )));
        }
        let rule = IngressRule {
            id: inner.next_id("fw"),
            public_ip_id: request.public_ip_id.clone(),
            protocol: request.protocol,
            start_port: request.start_port,
            end_port: request.end_port,
            cidrs: request.cidrs.clone(),
        };
        inner.ingress.push(rule.clone());
        Ok(rule)
    }

    async fn list_ingress_rules(&self, public_ip_id: &str) -> CloudResult<Vec<IngressRule>> {
        Ok(self
            .inner
            .lock()
            .await
            .ingress
            .iter()
            .filter(|r| r.public_ip_id == public_ip_id)
            .cloned()
            .collect())
    }

    async fn revoke_ingress_rule(&self, rule_id: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().await;
        let before = inner.ingress.len();
        inner.ingress.retain(|r| r.id != rule_id);
        if inner.ingress.len() == before {
            return Err(CloudError::not_found("ingress rule", rule_id));
        }
        Ok(())
    }

    async fn create_port_forward(&self, request: &PortForwardRequest) -> CloudResult<PortForward> {
        let mut inner = self.inner.lock().await;
        let conflict = inner
            .forwards
            .iter()
            .any(|r| r.public_ip_id == request.public_ip_id && r.public_port == request.public_port);
        if conflict {
            return Err(CloudError::Rejected(format!(
                "port {} already forwarded",
                request.public_port
            )));
        }
        let rule = PortForward {
            id: inner.next_id("pf"),
            public_ip_id: request.public_ip_id.clone(),
            public_port: request.public_port,
            vm_id: request.vm_id.clone(),
            private_ip: request.private_ip.clone(),
            private_port: request.private_port,
            protocol: request.protocol,
        };
        inner.forwards.push(rule.clone());
        Ok(rule)
    }

    async fn list_port_forwards(&self, public_ip_id: &str) -> CloudResult<Vec<PortForward>> {
        Ok(self
            .inner
            .lock()
            .await
            .forwards
            .iter()
            .filter(|r| r.public_ip_id == public_ip_id)
            .cloned()
            .collect())
    }

    async fn remove_port_forward(&self, rule_id: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().await;
        let before = inner.forwards.len();
        inner.forwards.retain(|r| r.id != rule_id);
        if inner.forwards.len() == before {
            return Err(CloudError::not_found("port forward", rule_id));
        }
        Ok(())
    }

    async fn apply_rules(&self, public_ip_id: &str) -> CloudResult<()> {
        let inner = self.inner.lock().await;
        if inner.public_ips.iter().any(|ip| ip.id == public_ip_id) {
            Ok(())
        } else {
            Err(CloudError::not_found("public ip", public_ip_id))
        }
    }
}

#[async_trait]
impl CertificateAuthority for SimulatedCloud {
    async fn issue(&self, request: &CertificateRequest) -> CloudResult<CertificateBundle> {
        if request.hostnames.is_empty() {
            return Err(CloudError::Rejected("certificate needs a hostname".into()));
        }
        let pem = |label: &str, body: &str| {
            format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----")
        };
        Ok(CertificateBundle {
            certificate: pem(
                "CERTIFICATE",
                &format!("{}\n{}", request.hostnames.join(","), request.ips.join(",")),
            ),
            private_key: pem("PRIVATE KEY", "c2FuZGJveC1rZXk="),
            ca_chain: vec![pem("CERTIFICATE", "c2FuZGJveC1jYQ==")],
        })
    }
}

#[async_trait]
impl RemoteExec for SimulatedCloud {
    async fn execute(&self, command: &RemoteCommand) -> CloudResult<CommandOutput> {
        let mut inner = self.inner.lock().await;
        inner.commands.push(command.clone());

        let target = inner
            .forwarded_vm(&command.host, command.port)
            .cloned()
            .ok_or_else(|| {
                CloudError::Remote(format!(
                    "connection refused: {}:{}",
                    command.host, command.port
                ))
            })?;
        let cmd = command.command.as_str();

        let ok = |output: String| CommandOutput {
            success: true,
            output,
        };

        if cmd.contains("cat /etc/kubernetes/admin.conf") {
            let ip = target.private_ip.clone().unwrap_or_default();
            return Ok(ok(kubeconfig_for(&ip)));
        }
        if cmd.contains("kubectl get pods") {
            let status = if inner.faults.addon_pending {
                "ContainerCreating"
            } else {
                "Running"
            };
            return Ok(ok(format!(
                "NAME READY STATUS RESTARTS AGE\n\
                 kube-dns-86f4d74b45-x7k2p 3/3 Running 0 5m\n\
                 {addon}-7b9c7bc8c9-lz8qw 1/1 {status} 0 4m\n",
                addon = DASHBOARD_ADDON,
            )));
        }
        if cmd.contains("kubectl get nodes") {
            return Ok(ok(format!("{}\n", inner.ready_node_count(&target.network_id))));
        }
        if let Some(rest) = cmd.strip_prefix("sudo kubectl drain ") {
            let host = rest.split_whitespace().next().unwrap_or_default();
            let known = inner.vms.values().any(|vm| !vm.removed && vm.hostname == host);
            return Ok(CommandOutput {
                success: known,
                output: format!("node/{host} drained\n"),
            });
        }
        if let Some(rest) = cmd.strip_prefix("sudo kubectl delete node ") {
            let host = rest.trim().to_string();
            inner.deleted_nodes.insert(host.clone());
            return Ok(ok(format!("node \"{host}\" deleted\n")));
        }
        Ok(CommandOutput {
            success: false,
            output: format!("unknown command: {cmd}"),
        })
    }
}

#[async_trait]
impl BootMediaService for SimulatedCloud {
    async fn find_media(&self, name: &str) -> CloudResult<Option<BootMedia>> {
        Ok(self
            .inner
            .lock()
            .await
            .media
            .iter()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn attach(&self, media_id: &str, vm_id: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.media.iter().any(|m| m.id == media_id) {
            return Err(CloudError::not_found("boot media", media_id));
        }
        inner.vm_mut(vm_id)?;
        inner.attached.insert(vm_id.to_string(), media_id.to_string());
        Ok(())
    }

    async fn detach(&self, vm_id: &str) -> CloudResult<()> {
        self.inner.lock().await.attached.remove(vm_id);
        Ok(())
    }
}

#[async_trait]
impl HostInventory for SimulatedCloud {
    async fn list_hosts(&self, zone_id: &str) -> CloudResult<Vec<HostCapacity>> {
        Ok(self
            .inner
            .lock()
            .await
            .hosts
            .iter()
            .filter(|h| h.zone_id == zone_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Catalog for SimulatedCloud {
    async fn zone(&self, zone_id: &str) -> CloudResult<Option<Zone>> {
        Ok(self.inner.lock().await.zones.get(zone_id).cloned())
    }

    async fn service_offering(&self, offering_id: &str) -> CloudResult<Option<ServiceOffering>> {
        Ok(self.inner.lock().await.offerings.get(offering_id).cloned())
    }

    async fn template_by_name(&self, name: &str) -> CloudResult<Option<Template>> {
        Ok(self
            .inner
            .lock()
            .await
            .templates
            .iter()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn ssh_key_pair(&self, account_id: &str, name: &str) -> CloudResult<Option<SshKeyPair>> {
        Ok(self
            .inner
            .lock()
            .await
            .key_pairs
            .iter()
            .find(|k| k.account_id == account_id && k.name == name)
            .cloned())
    }
}

#[async_trait]
impl ReachabilityProbe for SimulatedCloud {
    async fn is_reachable(&self, host: &str, port: u16, _timeout: Duration) -> bool {
        let inner = self.inner.lock().await;
        !inner.faults.api_unreachable && inner.forwarded_vm(host, port).is_some()
    }
}
