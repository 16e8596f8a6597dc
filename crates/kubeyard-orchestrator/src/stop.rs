//! Cluster stop.

use tracing::{debug, info, warn};

use kubeyard_cloud::VmState;
use kubeyard_state::{ClusterEvent, ClusterRecord, ClusterState};

use crate::context::WorkflowContext;
use crate::error::OrchestratorResult;

#[derive(Clone)]
pub struct StopWorkflow {
    ctx: WorkflowContext,
}

impl StopWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    /// Stop every mapped VM, then verify they all stopped.
    pub async fn stop(&self, cluster_id: &str) -> OrchestratorResult<ClusterRecord> {
        let ctx = &self.ctx;
        let cluster = ctx.load_cluster(cluster_id)?;
        if matches!(cluster.state, ClusterState::Stopped | ClusterState::Stopping) {
            debug!(cluster = %cluster_id, state = %cluster.state, "already stopped");
            return Ok(cluster);
        }
        ctx.machine
            .transition(cluster_id, ClusterEvent::StopRequested)?;
        info!(cluster = %cluster_id, name = %cluster.name, "stopping cluster");

        let mappings = ctx.store.list_vms(cluster_id)?;
        for mapping in &mappings {
            if let Err(e) = ctx.cloud.vms.stop(&mapping.vm_id).await {
                warn!(cluster = %cluster_id, vm = %mapping.vm_id, error = %e, "vm stop failed");
            }
        }

        let mut still_up = Vec::new();
        for mapping in &mappings {
            match ctx.cloud.vms.get(&mapping.vm_id).await {
                Ok(Some(vm)) if vm.state == VmState::Stopped => {}
                _ => still_up.push(mapping.vm_id.clone()),
            }
        }
        if !still_up.is_empty() {
            return Err(ctx.fail(
                cluster_id,
                ClusterEvent::OperationFailed,
                format!("vms not stopped: {}", still_up.join(", ")),
            ));
        }

        ctx.machine
            .transition(cluster_id, ClusterEvent::OperationSucceeded)?;
        info!(cluster = %cluster_id, "cluster stopped");
        ctx.load_cluster(cluster_id)
    }
}
