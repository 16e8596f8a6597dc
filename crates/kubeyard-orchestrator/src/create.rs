//! Cluster creation: validate everything, then persist the cluster and its
//! details in one write. No VM exists until the cluster is started.

use regex::Regex;
use tracing::info;
use uuid::Uuid;

use kubeyard_cloud::{CreateNetworkRequest, ServiceOffering};
use kubeyard_core::{LimitsConfig, settings};
use kubeyard_state::{
    ClusterDetails, ClusterRecord, ClusterState, Owner, RegistryCredentials, epoch_secs,
};

use crate::context::WorkflowContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::network_rules::{api_port_taken, cluster_public_ip};

const EMAIL_PATTERN: &str = r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,6}$";

pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateClusterRequest {
    pub name: String,
    pub description: String,
    pub zone_id: String,
    pub service_offering_id: String,
    pub owner: Owner,
    /// Existing isolated network; a dedicated one is created when absent.
    pub network_id: Option<String>,
    pub ssh_key_pair: Option<String>,
    /// Worker node count.
    pub size: u32,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    pub registry_url: Option<String>,
    pub registry_email: Option<String>,
}

/// Offerings usable for cluster VMs: fixed size and above the minimums.
pub fn check_offering(offering: &ServiceOffering, limits: &LimitsConfig) -> OrchestratorResult<()> {
    if offering.dynamic {
        return Err(OrchestratorError::Validation(format!(
            "custom offering {} is not supported for clusters",
            offering.id
        )));
    }
    if offering.ram_mb < limits.min_ram_mb {
        return Err(OrchestratorError::Validation(format!(
            "offering {} has {} MiB ram; at least {} MiB required",
            offering.id, offering.ram_mb, limits.min_ram_mb
        )));
    }
    if offering.cpu_mhz() < limits.min_cpu_mhz {
        return Err(OrchestratorError::Validation(format!(
            "offering {} has {} MHz cpu; at least {} MHz required",
            offering.id,
            offering.cpu_mhz(),
            limits.min_cpu_mhz
        )));
    }
    Ok(())
}

/// Registry credentials are all-or-nothing.
pub fn registry_credentials(
    request: &CreateClusterRequest,
) -> OrchestratorResult<Option<RegistryCredentials>> {
    let fields = [
        &request.registry_username,
        &request.registry_password,
        &request.registry_url,
        &request.registry_email,
    ];
    let count = fields
        .iter()
        .filter(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
        .count();
    if count == 0 {
        return Ok(None);
    }
    if count != fields.len() {
        return Err(OrchestratorError::Validation(
            "registry username, password, url and email must be given together".into(),
        ));
    }

    let credentials = RegistryCredentials {
        username: request.registry_username.clone().unwrap_or_default(),
        password: request.registry_password.clone().unwrap_or_default(),
        url: request.registry_url.clone().unwrap_or_default(),
        email: request.registry_email.clone().unwrap_or_default(),
    };
    let url_ok = ["http://", "https://"].iter().any(|scheme| {
        credentials
            .url
            .strip_prefix(*scheme)
            .is_some_and(|rest| !rest.is_empty())
    });
    if !url_ok {
        return Err(OrchestratorError::Validation(format!(
            "invalid registry url {}",
            credentials.url
        )));
    }
    let email_re = Regex::new(EMAIL_PATTERN)
        .map_err(|e| OrchestratorError::Validation(e.to_string()))?;
    if !email_re.is_match(&credentials.email) {
        return Err(OrchestratorError::Validation(format!(
            "invalid registry email {}",
            credentials.email
        )));
    }
    Ok(Some(credentials))
}

#[derive(Clone)]
pub struct CreateWorkflow {
    ctx: WorkflowContext,
}

impl CreateWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, request: &CreateClusterRequest) -> OrchestratorResult<ClusterRecord> {
        let ctx = &self.ctx;
        let catalog = ctx.cloud.catalog.as_ref();

        let name = request.name.trim();
        if name.is_empty() {
            return Err(OrchestratorError::Validation("cluster name is required".into()));
        }
        let max = ctx.config.limits.max_cluster_size;
        if request.size < 1 || request.size > max {
            return Err(OrchestratorError::Validation(format!(
                "size must be between 1 and {max}, got {}",
                request.size
            )));
        }

        let zone = catalog.zone(&request.zone_id).await?.ok_or_else(|| {
            OrchestratorError::Validation(format!("zone {} not found", request.zone_id))
        })?;
        if !zone.enabled {
            return Err(OrchestratorError::Permission(format!(
                "zone {} is disabled",
                zone.id
            )));
        }

        let offering = catalog
            .service_offering(&request.service_offering_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "service offering {} not found",
                    request.service_offering_id
                ))
            })?;
        check_offering(&offering, &ctx.config.limits)?;

        if let Some(key_pair) = &request.ssh_key_pair {
            if catalog
                .ssh_key_pair(&request.owner.account_id, key_pair)
                .await?
                .is_none()
            {
                return Err(OrchestratorError::Validation(format!(
                    "ssh key pair {key_pair} not found"
                )));
            }
        }

        let template_name = ctx.require_setting(settings::TEMPLATE_NAME)?;
        ctx.require_setting(settings::MASTER_BOOT_CONFIG)?;
        ctx.require_setting(settings::NODE_BOOT_CONFIG)?;
        let network_offering = ctx.require_setting(settings::NETWORK_OFFERING)?;
        let template = catalog
            .template_by_name(&template_name)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("template {template_name} not found"))
            })?;

        let registry = registry_credentials(request)?;

        ctx.planner
            .plan(request.size as u64 + 1, &offering, &zone.id)
            .await?;

        let (network_id, network_cleanup) = match &request.network_id {
            Some(network_id) => {
                self.check_network(network_id, &request.owner).await?;
                (network_id.clone(), false)
            }
            None => {
                let network = ctx
                    .cloud
                    .networks
                    .create_isolated_network(&CreateNetworkRequest {
                        name: format!("{name}-network"),
                        offering_name: network_offering,
                        zone_id: zone.id.clone(),
                        account_id: request.owner.account_id.clone(),
                        domain_id: request.owner.domain_id.clone(),
                    })
                    .await?;
                info!(network = %network.id, name = %network.name, "created cluster network");
                (network.id, true)
            }
        };

        let now = epoch_secs();
        let id = Uuid::new_v4().to_string();
        let record = ClusterRecord {
            id: id.clone(),
            name: name.to_string(),
            description: request.description.clone(),
            zone_id: zone.id.clone(),
            service_offering_id: offering.id.clone(),
            template_id: template.id.clone(),
            network_id,
            owner: request.owner.clone(),
            node_count: request.size,
            cores: offering.cpu as u64 * request.size as u64,
            memory_mb: offering.ram_mb * request.size as u64,
            state: ClusterState::Created,
            ssh_key_pair: request.ssh_key_pair.clone(),
            endpoint: None,
            console_endpoint: None,
            gc_pending: false,
            created_at: now,
            updated_at: now,
            removed_at: None,
        };
        let details = ClusterDetails {
            cluster_id: id.clone(),
            registry,
            admin_username: ADMIN_USERNAME.to_string(),
            admin_password: Uuid::new_v4().simple().to_string(),
            kube_config: None,
            network_cleanup,
        };
        ctx.store.create_cluster(&record, &details)?;
        info!(cluster = %id, %name, size = request.size, "cluster created");
        ctx.load_cluster(&id)
    }

    /// A caller-supplied network must be free, owned, isolated and have a
    /// public IP whose API port is unclaimed.
    async fn check_network(&self, network_id: &str, owner: &Owner) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let in_use = ctx
            .store
            .list_clusters()?
            .iter()
            .any(|c| !c.is_removed() && c.network_id == network_id);
        if in_use {
            return Err(OrchestratorError::Validation(format!(
                "network {network_id} is already used by another cluster"
            )));
        }
        let network = ctx
            .cloud
            .networks
            .get_network(network_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("network {network_id} not found"))
            })?;
        if network.account_id != owner.account_id {
            return Err(OrchestratorError::Permission(format!(
                "network {network_id} belongs to another account"
            )));
        }
        if !network.isolated {
            return Err(OrchestratorError::Validation(format!(
                "network {network_id} is not an isolated network"
            )));
        }
        let public_ip = cluster_public_ip(ctx.cloud.networks.as_ref(), network_id).await?;
        if api_port_taken(ctx.cloud.firewall.as_ref(), &public_ip).await? {
            return Err(OrchestratorError::Validation(format!(
                "port {} on {} is already in use",
                kubeyard_core::API_SERVER_PORT,
                public_ip.address
            )));
        }
        Ok(())
    }
}
