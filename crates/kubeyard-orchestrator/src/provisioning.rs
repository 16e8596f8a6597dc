//! Cluster start: cold (first boot after create) and warm (after stop).
//!
//! # Cold start
//!
//! ```text
//! StartRequested ─▶ capacity plan ─▶ network up ─▶ master ─▶ nodes
//!        ─▶ rules (6443, 2222..) ─▶ attach ISO ─▶ poll API ─▶ kubeconfig
//!        ─▶ poll add-on ─▶ detach ISO ─▶ OperationSucceeded
//! ```
//!
//! Any failing step fires `CreateFailed` (landing in `Error`), detaches the
//! ISO and returns [`OrchestratorError::Provisioning`]. Resources created
//! before the failure are left for teardown.
//!
//! # Warm start
//!
//! Every mapped VM is started best-effort. Only after the whole pass does
//! the workflow check that every VM is running and that the API endpoint
//! answers; either failing fires `OperationFailed`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error, info, warn};

use kubeyard_cloud::{CreateVmRequest, CertificateRequest, PublicIp, Vm, VmState};
use kubeyard_core::{API_SERVER_PORT, DASHBOARD_ADDON, SSH_BASE_PORT, settings};
use kubeyard_state::{ClusterDetails, ClusterEvent, ClusterRecord, ClusterState};

use crate::boot_config::{
    self, API_SERVER_NAMES, CERT_VALIDITY_DAYS, MasterBootParams, encode_user_data, join_token,
};
use crate::context::WorkflowContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::network_rules::{self, cluster_public_ip, guest_ip};
use crate::poll::wait_for;

const KUBECONFIG_COMMAND: &str = "sudo cat /etc/kubernetes/admin.conf";
const ADDON_COMMAND: &str = "sudo kubectl get pods --namespace=kube-system";

pub fn api_endpoint(public_ip: &str) -> String {
    format!("https://{public_ip}:{API_SERVER_PORT}/")
}

pub fn console_endpoint(public_ip: &str) -> String {
    format!(
        "https://{public_ip}:{API_SERVER_PORT}/api/v1/namespaces/kube-system/services/https:{DASHBOARD_ADDON}:/proxy#!/overview?namespace=_all"
    )
}

/// Host part of a persisted `https://host:port/` endpoint.
pub fn endpoint_host(endpoint: &str) -> Option<&str> {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))?;
    let authority = rest.split('/').next()?;
    let host = authority.rsplit_once(':').map_or(authority, |(h, _)| h);
    (!host.is_empty()).then_some(host)
}

#[derive(Clone)]
pub struct ProvisioningWorkflow {
    ctx: WorkflowContext,
}

impl ProvisioningWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    // ── Cold start ────────────────────────────────────────────────

    pub async fn cold_start(&self, cluster_id: &str) -> OrchestratorResult<ClusterRecord> {
        let ctx = &self.ctx;
        let cluster = ctx.load_cluster(cluster_id)?;
        if cluster.state != ClusterState::Created {
            return Err(OrchestratorError::Permission(format!(
                "cluster {cluster_id} is {}; only a newly created cluster can be provisioned",
                cluster.state
            )));
        }
        ctx.machine
            .transition(cluster_id, ClusterEvent::StartRequested)?;
        info!(cluster = %cluster_id, name = %cluster.name, nodes = cluster.node_count, "cold start");

        let offering = match ctx
            .cloud
            .catalog
            .service_offering(&cluster.service_offering_id)
            .await
        {
            Ok(Some(offering)) => offering,
            Ok(None) => {
                return Err(ctx.fail(
                    cluster_id,
                    ClusterEvent::CreateFailed,
                    format!("service offering {} not found", cluster.service_offering_id),
                ));
            }
            Err(e) => return Err(ctx.fail(cluster_id, ClusterEvent::CreateFailed, e)),
        };
        if let Err(e) = ctx
            .planner
            .plan(cluster.expected_vm_count() as u64, &offering, &cluster.zone_id)
            .await
        {
            warn!(cluster = %cluster_id, error = %e, "no capacity for cluster");
            ctx.fire_failure(cluster_id, ClusterEvent::CreateFailed);
            return Err(e.into());
        }

        if let Err(e) = self.bring_up(&cluster).await {
            error!(cluster = %cluster_id, error = %e, "cold start failed");
            let vm_ids = self.mapped_vm_ids(cluster_id);
            ctx.detach_boot_media(cluster_id, &vm_ids).await;
            return Err(ctx.fail(cluster_id, ClusterEvent::CreateFailed, e));
        }

        ctx.machine
            .transition(cluster_id, ClusterEvent::OperationSucceeded)?;
        info!(cluster = %cluster_id, "cluster running");
        ctx.load_cluster(cluster_id)
    }

    /// Every cold-start step between capacity planning and the final
    /// transition.
    async fn bring_up(&self, cluster: &ClusterRecord) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let id = cluster.id.as_str();
        let details = ctx
            .store
            .get_details(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        ctx.cloud
            .networks
            .start_network(&cluster.network_id, &cluster.zone_id)
            .await?;
        let public_ips = ctx.cloud.networks.list_public_ips(&cluster.network_id).await?;
        let public_ip = public_ips.first().cloned().ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "network {} has no public IP",
                cluster.network_id
            ))
        })?;
        debug!(cluster = %id, ip = %public_ip.address, "network started");

        let master_ip = ctx.cloud.networks.acquire_guest_ip(&cluster.network_id).await?;
        let master = self
            .launch_master(cluster, &master_ip, &public_ips)
            .await?;
        let mut vms = vec![master];
        for node in 1..=cluster.node_count {
            vms.push(self.launch_node(cluster, &details, &master_ip, node).await?);
        }

        network_rules::open_cluster_rules(ctx.cloud.firewall.as_ref(), &public_ip, &vms).await?;
        let vm_ids: Vec<String> = vms.iter().map(|(_, vm)| vm.id.clone()).collect();
        ctx.attach_boot_media(id, &vm_ids).await;

        self.wait_for_api_server(&public_ip.address, ctx.config.polling.api_server)
            .await?;
        let endpoint = api_endpoint(&public_ip.address);
        ctx.store
            .update_cluster(id, |c| c.endpoint = Some(endpoint.clone()))?;
        info!(cluster = %id, %endpoint, "api server reachable");

        self.fetch_kubeconfig(id, &public_ip, &master_ip).await?;
        self.wait_for_addon(&public_ip.address).await?;

        let console = console_endpoint(&public_ip.address);
        ctx.store
            .update_cluster(id, |c| c.console_endpoint = Some(console))?;
        ctx.detach_boot_media(id, &vm_ids).await;
        Ok(())
    }

    async fn launch_master(
        &self,
        cluster: &ClusterRecord,
        master_ip: &str,
        public_ips: &[PublicIp],
    ) -> OrchestratorResult<(u32, Vm)> {
        let ctx = &self.ctx;
        let hostname = boot_config::master_hostname(&cluster.name);

        let mut hostnames = vec![hostname.clone()];
        hostnames.extend(API_SERVER_NAMES.iter().map(|n| n.to_string()));
        let mut ips = vec![master_ip.to_string()];
        ips.extend(public_ips.iter().map(|ip| ip.address.clone()));
        let certificates = ctx
            .cloud
            .certificates
            .issue(&CertificateRequest {
                hostnames,
                ips,
                validity_days: CERT_VALIDITY_DAYS,
            })
            .await?;

        let mut authorized_keys = Vec::new();
        if let Some(key) = ctx.setting(settings::MANAGEMENT_SSH_KEY) {
            authorized_keys.push(key);
        }
        if let Some(name) = &cluster.ssh_key_pair {
            if let Some(pair) = ctx
                .cloud
                .catalog
                .ssh_key_pair(&cluster.owner.account_id, name)
                .await?
            {
                authorized_keys.push(pair.public_key);
            }
        }

        let template = self.read_template(settings::MASTER_BOOT_CONFIG).await?;
        let token = join_token(&cluster.id);
        let public_ip = public_ips
            .first()
            .map(|ip| ip.address.as_str())
            .unwrap_or_default();
        let rendered = boot_config::render_master(
            &template,
            &MasterBootParams {
                certificates: &certificates,
                token: &token,
                authorized_keys: &authorized_keys,
                public_ip,
            },
        );

        let request = self.vm_request(cluster, hostname, &rendered, Some(master_ip.to_string()));
        self.launch(cluster, request).await
    }

    /// Create, map and start worker `node` of a cluster.
    pub(crate) async fn launch_node(
        &self,
        cluster: &ClusterRecord,
        details: &ClusterDetails,
        master_ip: &str,
        node: u32,
    ) -> OrchestratorResult<(u32, Vm)> {
        let template = self.read_template(settings::NODE_BOOT_CONFIG).await?;
        let rendered = boot_config::render_node(
            &template,
            master_ip,
            &join_token(&cluster.id),
            details.registry.as_ref(),
        );
        let hostname = boot_config::node_hostname(&cluster.name, node);
        let request = self.vm_request(cluster, hostname, &rendered, None);
        self.launch(cluster, request).await
    }

    fn vm_request(
        &self,
        cluster: &ClusterRecord,
        hostname: String,
        boot_config: &str,
        requested_ip: Option<String>,
    ) -> CreateVmRequest {
        CreateVmRequest {
            name: hostname.clone(),
            hostname,
            zone_id: cluster.zone_id.clone(),
            offering_id: cluster.service_offering_id.clone(),
            template_id: cluster.template_id.clone(),
            network_id: cluster.network_id.clone(),
            account_id: cluster.owner.account_id.clone(),
            domain_id: cluster.owner.domain_id.clone(),
            user_data: encode_user_data(boot_config),
            ssh_key_pair: cluster.ssh_key_pair.clone(),
            requested_ip,
        }
    }

    /// Create the VM, map it, then start it. The map entry survives a
    /// failed start so teardown can find the VM.
    async fn launch(
        &self,
        cluster: &ClusterRecord,
        request: CreateVmRequest,
    ) -> OrchestratorResult<(u32, Vm)> {
        let ctx = &self.ctx;
        let vm = ctx.cloud.vms.create(&request).await?;
        let mapping = ctx.store.append_vm(&cluster.id, &vm.id)?;
        let vm = ctx.cloud.vms.start(&vm.id).await?;
        info!(
            cluster = %cluster.id,
            vm = %vm.id,
            hostname = %vm.hostname,
            index = mapping.index,
            "vm started"
        );
        Ok((mapping.index, vm))
    }

    async fn read_template(&self, key: &str) -> OrchestratorResult<String> {
        let path = self.ctx.require_setting(key)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            OrchestratorError::Validation(format!("cannot read boot config {path}: {e}"))
        })
    }

    fn mapped_vm_ids(&self, cluster_id: &str) -> Vec<String> {
        match self.ctx.store.list_vms(cluster_id) {
            Ok(mappings) => mappings.into_iter().map(|m| m.vm_id).collect(),
            Err(e) => {
                warn!(cluster = %cluster_id, error = %e, "cannot list mapped vms");
                Vec::new()
            }
        }
    }

    async fn wait_for_api_server(
        &self,
        host: &str,
        policy: kubeyard_core::RetryPolicy,
    ) -> OrchestratorResult<()> {
        let probe = self.ctx.cloud.probe.as_ref();
        let timeout = self.ctx.config.ssh.connect_timeout;
        wait_for("api server", policy, &self.ctx.shutdown, move |_| async move {
            probe
                .is_reachable(host, API_SERVER_PORT, timeout)
                .await
                .then_some(())
        })
        .await
    }

    /// Copy the admin kubeconfig off the master, point it at the public IP
    /// and store it base64 encoded.
    async fn fetch_kubeconfig(
        &self,
        cluster_id: &str,
        public_ip: &PublicIp,
        master_ip: &str,
    ) -> OrchestratorResult<()> {
        let remote = self.ctx.cloud.remote.as_ref();
        let command = self
            .ctx
            .remote_command(&public_ip.address, SSH_BASE_PORT, KUBECONFIG_COMMAND);
        let command = &command;
        let raw = wait_for(
            "kubeconfig",
            self.ctx.config.polling.kubeconfig,
            &self.ctx.shutdown,
            move |_| async move {
                match remote.execute(command).await {
                    Ok(out) if out.success && !out.output.trim().is_empty() => Some(out.output),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(cluster = %cluster_id, error = %e, "kubeconfig retrieval failed");
                        None
                    }
                }
            },
        )
        .await?;

        let kube_config = raw.replace(
            &format!("server: https://{master_ip}:{API_SERVER_PORT}"),
            &format!("server: https://{}:{API_SERVER_PORT}", public_ip.address),
        );
        let encoded = STANDARD.encode(kube_config);
        self.ctx
            .store
            .update_details(cluster_id, |d| d.kube_config = Some(encoded))?;
        debug!(cluster = %cluster_id, "kubeconfig stored");
        Ok(())
    }

    async fn wait_for_addon(&self, host: &str) -> OrchestratorResult<()> {
        let remote = self.ctx.cloud.remote.as_ref();
        let command = self.ctx.remote_command(host, SSH_BASE_PORT, ADDON_COMMAND);
        let command = &command;
        wait_for(
            DASHBOARD_ADDON,
            self.ctx.config.polling.addon,
            &self.ctx.shutdown,
            move |_| async move {
                let out = remote.execute(command).await.ok()?;
                out.output
                    .lines()
                    .any(|line| line.contains(DASHBOARD_ADDON) && line.contains("Running"))
                    .then_some(())
            },
        )
        .await
    }

    // ── Warm start ────────────────────────────────────────────────

    pub async fn warm_start(&self, cluster_id: &str) -> OrchestratorResult<ClusterRecord> {
        let ctx = &self.ctx;
        let cluster = ctx.load_cluster(cluster_id)?;
        if matches!(cluster.state, ClusterState::Running | ClusterState::Starting) {
            debug!(cluster = %cluster_id, state = %cluster.state, "already started");
            return Ok(cluster);
        }
        ctx.machine
            .transition(cluster_id, ClusterEvent::StartRequested)?;
        info!(cluster = %cluster_id, name = %cluster.name, "warm start");

        let mappings = ctx.store.list_vms(cluster_id)?;
        for mapping in &mappings {
            if let Err(e) = ctx.cloud.vms.start(&mapping.vm_id).await {
                warn!(cluster = %cluster_id, vm = %mapping.vm_id, error = %e, "vm start failed");
            }
        }

        let mut not_running = Vec::new();
        for mapping in &mappings {
            match ctx.cloud.vms.get(&mapping.vm_id).await {
                Ok(Some(vm)) if vm.state == VmState::Running && !vm.removed => {}
                _ => not_running.push(mapping.vm_id.clone()),
            }
        }
        if !not_running.is_empty() {
            return Err(ctx.fail(
                cluster_id,
                ClusterEvent::OperationFailed,
                format!("vms not running after start: {}", not_running.join(", ")),
            ));
        }

        let Some(host) = cluster.endpoint.as_deref().and_then(endpoint_host) else {
            return Err(ctx.fail(
                cluster_id,
                ClusterEvent::OperationFailed,
                "cluster has no api endpoint",
            ));
        };
        if let Err(e) = self
            .wait_for_api_server(host, ctx.config.polling.warm_api_server)
            .await
        {
            return Err(ctx.fail(cluster_id, ClusterEvent::OperationFailed, e));
        }

        ctx.machine
            .transition(cluster_id, ClusterEvent::OperationSucceeded)?;
        info!(cluster = %cluster_id, "cluster running");
        ctx.load_cluster(cluster_id)
    }

    /// Public IP the cluster is addressed through.
    pub(crate) async fn public_ip(&self, cluster: &ClusterRecord) -> OrchestratorResult<PublicIp> {
        cluster_public_ip(self.ctx.cloud.networks.as_ref(), &cluster.network_id).await
    }

    /// Guest IP of the master (map index 0).
    pub(crate) async fn master_ip(&self, cluster_id: &str) -> OrchestratorResult<String> {
        let master = self
            .ctx
            .store
            .list_vms(cluster_id)?
            .into_iter()
            .find(|m| m.is_master())
            .ok_or_else(|| OrchestratorError::NotFound(format!("master of {cluster_id}")))?;
        let vm = self
            .ctx
            .cloud
            .vms
            .get(&master.vm_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("vm {}", master.vm_id)))?;
        Ok(guest_ip(&vm)?.to_string())
    }
}
