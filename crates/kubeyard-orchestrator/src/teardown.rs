//! Cluster teardown.
//!
//! Resumable: every mapped VM that is still around is destroyed and
//! expunged, one at a time, and its map entry dropped as soon as it is gone.
//! A pass that leaves anything behind (a VM that refused to die, a network
//! that could not be destroyed) flags the cluster for the garbage collector
//! and returns [`TeardownOutcome::Deferred`] instead of an error. A
//! completed pass soft-deletes the cluster.

use tracing::{debug, info, warn};

use kubeyard_cloud::VmState;
use kubeyard_state::{ClusterEvent, ClusterRecord, ClusterState};

use crate::context::WorkflowContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::poll::wait_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Every resource is gone and the cluster is soft-deleted.
    Completed,
    /// Something was left behind; the cluster is flagged for GC.
    Deferred { reason: String },
}

#[derive(Clone)]
pub struct TeardownWorkflow {
    ctx: WorkflowContext,
}

impl TeardownWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    pub async fn teardown(&self, cluster_id: &str) -> OrchestratorResult<TeardownOutcome> {
        let ctx = &self.ctx;
        let cluster = ctx
            .store
            .get_cluster(cluster_id)?
            .ok_or_else(|| OrchestratorError::NotFound(cluster_id.to_string()))?;
        if cluster.is_removed() || cluster.state == ClusterState::Destroyed {
            debug!(cluster = %cluster_id, "already torn down");
            return Ok(TeardownOutcome::Completed);
        }
        if !matches!(
            cluster.state,
            ClusterState::Running
                | ClusterState::Stopped
                | ClusterState::Alert
                | ClusterState::Error
                | ClusterState::Destroying
        ) {
            return Err(OrchestratorError::Permission(format!(
                "cluster {cluster_id} cannot be deleted while {}",
                cluster.state
            )));
        }

        ctx.machine
            .transition(cluster_id, ClusterEvent::DestroyRequested)?;
        info!(cluster = %cluster_id, name = %cluster.name, "tearing down cluster");

        let mut destroyed = Vec::new();
        let mut failed = Vec::new();
        let mappings = match ctx.store.list_vms(cluster_id) {
            Ok(mappings) => mappings,
            Err(e) => return self.defer(cluster_id, format!("cannot list vms: {e}")),
        };
        for mapping in mappings {
            if let Err(e) = self.destroy_vm(&mapping.vm_id).await {
                warn!(cluster = %cluster_id, vm = %mapping.vm_id, error = %e, "vm destroy failed");
                failed.push(mapping.vm_id);
                continue;
            }
            // The next pass finds the vm gone and retries the unmap.
            if let Err(e) = ctx.store.remove_vm(cluster_id, mapping.index) {
                warn!(cluster = %cluster_id, vm = %mapping.vm_id, error = %e, "vm unmap failed");
                failed.push(mapping.vm_id);
                continue;
            }
            destroyed.push(mapping.vm_id);
        }
        if !failed.is_empty() {
            return self.defer(cluster_id, format!("vms not cleaned up: {}", failed.join(", ")));
        }

        let network_cleanup = ctx
            .store
            .get_details(cluster_id)?
            .is_some_and(|d| d.network_cleanup);
        if network_cleanup {
            if let Err(reason) = self.destroy_network(&cluster, &destroyed).await {
                return self.defer(cluster_id, reason);
            }
        }

        ctx.machine
            .transition(cluster_id, ClusterEvent::OperationSucceeded)?;
        ctx.store.soft_delete_cluster(cluster_id)?;
        info!(cluster = %cluster_id, "cluster deleted");
        Ok(TeardownOutcome::Completed)
    }

    /// Destroy then expunge. A VM the infrastructure no longer has, or has
    /// already removed, counts as done.
    async fn destroy_vm(&self, vm_id: &str) -> OrchestratorResult<()> {
        let vms = &self.ctx.cloud.vms;
        match vms.get(vm_id).await? {
            None => return Ok(()),
            Some(vm) if vm.removed => return Ok(()),
            Some(_) => {}
        }
        let vm = vms.destroy(vm_id).await?;
        if vm.state != VmState::Expunging {
            return Err(OrchestratorError::Cloud(kubeyard_cloud::CloudError::Rejected(
                format!("vm {vm_id} is {} after destroy", vm.state),
            )));
        }
        vms.expunge(vm_id).await?;
        debug!(vm = %vm_id, "vm expunged");
        Ok(())
    }

    async fn destroy_network(
        &self,
        cluster: &ClusterRecord,
        destroyed: &[String],
    ) -> Result<(), String> {
        let vms = self.ctx.cloud.vms.as_ref();
        let removal = wait_for(
            "vm removal",
            self.ctx.config.polling.vm_removal,
            &self.ctx.shutdown,
            move |_| async move {
                for vm_id in destroyed {
                    if let Ok(Some(vm)) = vms.get(vm_id).await {
                        if !vm.removed {
                            return None;
                        }
                    }
                }
                Some(())
            },
        )
        .await;
        if let Err(e) = removal {
            warn!(cluster = %cluster.id, error = %e, "vm removal not confirmed; destroying network anyway");
        }

        match self.ctx.cloud.networks.destroy_network(&cluster.network_id).await {
            Ok(true) => {
                info!(cluster = %cluster.id, network = %cluster.network_id, "network destroyed");
                Ok(())
            }
            Ok(false) => Err(format!("network {} was not destroyed", cluster.network_id)),
            Err(e) => Err(format!("network {} destroy failed: {e}", cluster.network_id)),
        }
    }

    fn defer(&self, cluster_id: &str, reason: String) -> OrchestratorResult<TeardownOutcome> {
        self.ctx
            .store
            .update_cluster(cluster_id, |c| c.gc_pending = true)?;
        self.ctx
            .fire_failure(cluster_id, ClusterEvent::OperationFailed);
        warn!(cluster = %cluster_id, %reason, "teardown incomplete; left for garbage collection");
        Ok(TeardownOutcome::Deferred { reason })
    }
}
