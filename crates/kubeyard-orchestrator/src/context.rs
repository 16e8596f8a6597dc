//! Shared handles every workflow runs against.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use kubeyard_capacity::CapacityPlanner;
use kubeyard_cloud::{CloudServices, RemoteCommand, Vm};
use kubeyard_core::{ServiceConfig, settings};
use kubeyard_state::{
    ClusterEvent, ClusterRecord, ClusterStateMachine, ClusterVmMapping, StateStore,
};

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Clone)]
pub struct WorkflowContext {
    pub store: StateStore,
    pub machine: ClusterStateMachine,
    pub cloud: CloudServices,
    pub planner: CapacityPlanner,
    pub config: Arc<ServiceConfig>,
    /// Flips to `true` when the process is shutting down; cancels polls.
    pub shutdown: watch::Receiver<bool>,
}

impl WorkflowContext {
    pub fn new(
        store: StateStore,
        cloud: CloudServices,
        config: ServiceConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            machine: ClusterStateMachine::new(store.clone()),
            planner: CapacityPlanner::new(cloud.hosts.clone()),
            store,
            cloud,
            config: Arc::new(config),
            shutdown,
        }
    }

    /// Live (not soft-deleted) cluster by id.
    pub fn load_cluster(&self, cluster_id: &str) -> OrchestratorResult<ClusterRecord> {
        self.store
            .get_cluster(cluster_id)?
            .filter(|c| !c.is_removed())
            .ok_or_else(|| OrchestratorError::NotFound(cluster_id.to_string()))
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.cloud.config.get(key)
    }

    pub fn require_setting(&self, key: &str) -> OrchestratorResult<String> {
        self.setting(key).ok_or_else(|| {
            OrchestratorError::Validation(format!("service setting {key} is not configured"))
        })
    }

    /// Private key used for remote commands.
    ///
    /// Falls back to `~/.ssh/id_rsa`, or `~/.ssh/id_rsa.cloud` in developer mode.
    pub fn ssh_key_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.ssh.key_file {
            return Some(path.clone());
        }
        let home = std::env::var_os("HOME")?;
        let developer = self
            .setting(settings::DEVELOPER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let name = if developer { "id_rsa.cloud" } else { "id_rsa" };
        Some(PathBuf::from(home).join(".ssh").join(name))
    }

    pub fn remote_command(&self, host: &str, port: u16, command: &str) -> RemoteCommand {
        RemoteCommand {
            host: host.to_string(),
            port,
            user: self.config.ssh.user.clone(),
            key_file: self.ssh_key_file(),
            command: command.to_string(),
            connect_timeout: self.config.ssh.connect_timeout,
            read_timeout: self.config.ssh.read_timeout,
        }
    }

    /// Record a failed step on the cluster and build the error for the caller.
    ///
    /// A rejected failure transition is logged; the step's error still wins.
    pub fn fail(
        &self,
        cluster_id: &str,
        event: ClusterEvent,
        reason: impl std::fmt::Display,
    ) -> OrchestratorError {
        self.fire_failure(cluster_id, event);
        OrchestratorError::provisioning(cluster_id, reason)
    }

    pub fn fire_failure(&self, cluster_id: &str, event: ClusterEvent) {
        if let Err(e) = self.machine.transition(cluster_id, event) {
            warn!(cluster = %cluster_id, %event, error = %e, "failure transition rejected");
        }
    }

    /// Mapped VMs in index order with their live view. `None` when the
    /// infrastructure no longer knows the VM.
    pub async fn mapped_vms(
        &self,
        cluster_id: &str,
    ) -> OrchestratorResult<Vec<(ClusterVmMapping, Option<Vm>)>> {
        let mut out = Vec::new();
        for mapping in self.store.list_vms(cluster_id)? {
            let vm = self.cloud.vms.get(&mapping.vm_id).await?;
            out.push((mapping, vm));
        }
        Ok(out)
    }

    /// Attach the bootstrap ISO to each VM. Missing media only warns.
    pub async fn attach_boot_media(&self, cluster_id: &str, vm_ids: &[String]) {
        let Some(name) = self.setting(settings::BOOTSTRAP_MEDIA) else {
            warn!(cluster = %cluster_id, "no bootstrap media configured; skipping attach");
            return;
        };
        let media = match self.cloud.boot_media.find_media(&name).await {
            Ok(Some(media)) => media,
            Ok(None) => {
                warn!(cluster = %cluster_id, media = %name, "bootstrap media not found; skipping attach");
                return;
            }
            Err(e) => {
                warn!(cluster = %cluster_id, media = %name, error = %e, "bootstrap media lookup failed");
                return;
            }
        };
        for vm_id in vm_ids {
            match self.cloud.boot_media.attach(&media.id, vm_id).await {
                Ok(()) => debug!(cluster = %cluster_id, vm = %vm_id, "bootstrap media attached"),
                Err(e) => warn!(cluster = %cluster_id, vm = %vm_id, error = %e, "attach failed"),
            }
        }
    }

    pub async fn detach_boot_media(&self, cluster_id: &str, vm_ids: &[String]) {
        for vm_id in vm_ids {
            if let Err(e) = self.cloud.boot_media.detach(vm_id).await {
                warn!(cluster = %cluster_id, vm = %vm_id, error = %e, "detach failed");
            }
        }
    }
}
