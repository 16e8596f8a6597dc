//! Vertical (offering) and horizontal (node count) scaling.
//!
//! All validation runs before anything is mutated. On a running cluster the
//! offering change goes first, so nodes added in the same request already
//! boot with the new offering. A cluster still in `Created` only has its
//! record updated; a stopped cluster accepts an offering change but not a
//! node count change.
//!
//! A cluster whose VM map does not hold exactly the master plus
//! `node_count` nodes is refused; a running one is raised to Alert.

use tracing::{debug, info, warn};

use kubeyard_cloud::{ServiceOffering, VmState};
use kubeyard_core::SSH_BASE_PORT;
use kubeyard_state::{ClusterEvent, ClusterRecord, ClusterState};

use crate::context::WorkflowContext;
use crate::create::check_offering;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::network_rules;
use crate::poll::wait_for;
use crate::provisioning::ProvisioningWorkflow;

const READY_NODES_COMMAND: &str = "sudo kubectl get nodes | grep -w Ready | wc -l";

/// What a scale request asks for. At least one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleRequest {
    pub service_offering_id: Option<String>,
    /// Target worker count.
    pub size: Option<u32>,
}

/// A validated plan: `None` fields mean "unchanged".
struct ScalePlan {
    offering: ServiceOffering,
    offering_changed: bool,
    target_size: Option<u32>,
}

#[derive(Clone)]
pub struct ScalingWorkflow {
    ctx: WorkflowContext,
    provisioning: ProvisioningWorkflow,
}

impl ScalingWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self {
            provisioning: ProvisioningWorkflow::new(ctx.clone()),
            ctx,
        }
    }

    pub async fn scale(
        &self,
        cluster_id: &str,
        request: &ScaleRequest,
    ) -> OrchestratorResult<ClusterRecord> {
        let cluster = self.ctx.load_cluster(cluster_id)?;
        let plan = self.validate(&cluster, request).await?;
        if !plan.offering_changed && plan.target_size.is_none() {
            debug!(cluster = %cluster_id, "scale request changes nothing");
            return Ok(cluster);
        }

        match cluster.state {
            ClusterState::Created => self.scale_record_only(&cluster, &plan),
            ClusterState::Stopped => {
                self.check_vm_accounting(&cluster)?;
                self.change_offering(&cluster, &plan.offering).await?;
                self.ctx.load_cluster(cluster_id)
            }
            _ => self.scale_running(&cluster, &plan).await,
        }
    }

    async fn validate(
        &self,
        cluster: &ClusterRecord,
        request: &ScaleRequest,
    ) -> OrchestratorResult<ScalePlan> {
        let ctx = &self.ctx;
        if request.service_offering_id.is_none() && request.size.is_none() {
            return Err(OrchestratorError::Validation(
                "either a service offering or a size is required".into(),
            ));
        }
        if !matches!(
            cluster.state,
            ClusterState::Created | ClusterState::Running | ClusterState::Stopped
        ) {
            return Err(OrchestratorError::Permission(format!(
                "cluster {} cannot be scaled while {}",
                cluster.id, cluster.state
            )));
        }

        let target_size = match request.size {
            Some(size) if size == cluster.node_count => None,
            Some(size) => {
                let max = ctx.config.limits.max_cluster_size;
                if size < 1 || size > max {
                    return Err(OrchestratorError::Validation(format!(
                        "size must be between 1 and {max}, got {size}"
                    )));
                }
                if cluster.state == ClusterState::Stopped {
                    return Err(OrchestratorError::Permission(format!(
                        "cluster {} must be running to change its size",
                        cluster.id
                    )));
                }
                Some(size)
            }
            None => None,
        };

        let current = ctx
            .cloud
            .catalog
            .service_offering(&cluster.service_offering_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!(
                    "service offering {}",
                    cluster.service_offering_id
                ))
            })?;

        let (offering, offering_changed) = match &request.service_offering_id {
            Some(id) if *id != current.id => {
                let offering = ctx.cloud.catalog.service_offering(id).await?.ok_or_else(|| {
                    OrchestratorError::Validation(format!("service offering {id} not found"))
                })?;
                check_offering(&offering, &ctx.config.limits)?;
                if offering.cpu_mhz() < current.cpu_mhz() || offering.ram_mb < current.ram_mb {
                    return Err(OrchestratorError::Validation(format!(
                        "offering {} is smaller than the current offering {}",
                        offering.id, current.id
                    )));
                }
                self.check_live_resize(cluster).await?;
                (offering, true)
            }
            _ => (current, false),
        };

        Ok(ScalePlan {
            offering,
            offering_changed,
            target_size,
        })
    }

    /// Every running VM must sit on a hypervisor that resizes in place.
    async fn check_live_resize(&self, cluster: &ClusterRecord) -> OrchestratorResult<()> {
        for (mapping, vm) in self.ctx.mapped_vms(&cluster.id).await? {
            let Some(vm) = vm else { continue };
            if vm.state == VmState::Running && !vm.hypervisor.supports_live_resize() {
                return Err(OrchestratorError::Permission(format!(
                    "vm {} (index {}) runs on {}, which cannot resize a running vm",
                    vm.id, mapping.index, vm.hypervisor
                )));
            }
        }
        Ok(())
    }

    fn scale_record_only(
        &self,
        cluster: &ClusterRecord,
        plan: &ScalePlan,
    ) -> OrchestratorResult<ClusterRecord> {
        let size = plan.target_size.unwrap_or(cluster.node_count);
        let offering = &plan.offering;
        let updated = self.ctx.store.update_cluster(&cluster.id, |c| {
            c.service_offering_id = offering.id.clone();
            c.node_count = size;
            c.cores = offering.cpu as u64 * size as u64;
            c.memory_mb = offering.ram_mb * size as u64;
        })?;
        info!(cluster = %cluster.id, size, offering = %offering.id, "scaled cluster record");
        Ok(updated)
    }

    async fn scale_running(
        &self,
        cluster: &ClusterRecord,
        plan: &ScalePlan,
    ) -> OrchestratorResult<ClusterRecord> {
        let ctx = &self.ctx;
        let id = cluster.id.as_str();

        let event = match plan.target_size {
            Some(target) if !plan.offering_changed && target < cluster.node_count => {
                ClusterEvent::ScaleDownRequested
            }
            _ => ClusterEvent::ScaleUpRequested,
        };
        ctx.machine.transition(id, event)?;

        if let Err(e) = self.check_vm_accounting(cluster) {
            ctx.fire_failure(id, ClusterEvent::OperationFailed);
            return Err(e);
        }

        if plan.offering_changed {
            if let Err(e) = self.change_offering(cluster, &plan.offering).await {
                return Err(ctx.fail(id, ClusterEvent::OperationFailed, e));
            }
        }

        if let Some(target) = plan.target_size {
            let cluster = ctx.load_cluster(id)?;
            let result = if target > cluster.node_count {
                let delta = (target - cluster.node_count) as u64;
                if let Err(e) = ctx.planner.plan(delta, &plan.offering, &cluster.zone_id).await {
                    warn!(cluster = %id, error = %e, "no capacity for new nodes");
                    ctx.fire_failure(id, ClusterEvent::OperationFailed);
                    return Err(e.into());
                }
                self.upscale(&cluster, target).await
            } else {
                self.downscale(&cluster, target).await
            };
            if let Err(e) = result {
                return Err(ctx.fail(id, ClusterEvent::OperationFailed, e));
            }
            let offering = &plan.offering;
            ctx.store.update_cluster(id, |c| {
                c.node_count = target;
                c.cores = offering.cpu as u64 * target as u64;
                c.memory_mb = offering.ram_mb * target as u64;
            })?;
        }

        ctx.machine.transition(id, ClusterEvent::OperationSucceeded)?;
        info!(cluster = %id, "cluster scaled");
        ctx.load_cluster(id)
    }

    /// The VM map must hold exactly the master plus `node_count` nodes.
    fn check_vm_accounting(&self, cluster: &ClusterRecord) -> OrchestratorResult<()> {
        let mapped = self.ctx.store.list_vms(&cluster.id)?.len();
        let expected = cluster.expected_vm_count();
        if mapped != expected {
            return Err(OrchestratorError::provisioning(
                &cluster.id,
                format!("cluster is unstable: {mapped} vms mapped, {expected} expected"),
            ));
        }
        Ok(())
    }

    /// Resize the mapped VMs to `offering`, then persist it. VMs already
    /// resized before a failure keep their new size.
    async fn change_offering(
        &self,
        cluster: &ClusterRecord,
        offering: &ServiceOffering,
    ) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let mappings = ctx.store.list_vms(&cluster.id)?;
        for mapping in mappings.iter().take(cluster.expected_vm_count()) {
            ctx.cloud.vms.resize(&mapping.vm_id, &offering.id).await?;
            debug!(cluster = %cluster.id, vm = %mapping.vm_id, offering = %offering.id, "vm resized");
        }
        let size = cluster.node_count as u64;
        ctx.store.update_cluster(&cluster.id, |c| {
            c.service_offering_id = offering.id.clone();
            c.cores = offering.cpu as u64 * size;
            c.memory_mb = offering.ram_mb * size;
        })?;
        info!(cluster = %cluster.id, offering = %offering.id, "offering changed");
        Ok(())
    }

    async fn upscale(&self, cluster: &ClusterRecord, target: u32) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let id = cluster.id.as_str();
        let delta = target - cluster.node_count;
        info!(cluster = %id, from = cluster.node_count, to = target, "adding nodes");

        let details = ctx
            .store
            .get_details(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        let master_ip = self.provisioning.master_ip(id).await?;
        let next_index = ctx
            .store
            .list_vms(id)?
            .last()
            .map_or(1, |m| m.index + 1);

        let mut added = Vec::new();
        for node in next_index..next_index + delta {
            added.push(
                self.provisioning
                    .launch_node(cluster, &details, &master_ip, node)
                    .await?,
            );
        }

        let public_ip = self.provisioning.public_ip(cluster).await?;
        let firewall = ctx.cloud.firewall.as_ref();
        let span = network_rules::ssh_span(&ctx.store.list_vms(id)?);
        network_rules::rescale_ssh_range(firewall, &public_ip, span).await?;
        network_rules::add_ssh_forwards(firewall, &public_ip, &added).await?;
        firewall.apply_rules(&public_ip.id).await?;

        let vm_ids: Vec<String> = added.iter().map(|(_, vm)| vm.id.clone()).collect();
        ctx.attach_boot_media(id, &vm_ids).await;
        let ready = self
            .wait_for_ready_nodes(&public_ip.address, target as usize + 1)
            .await;
        ctx.detach_boot_media(id, &vm_ids).await;
        ready
    }

    async fn wait_for_ready_nodes(&self, host: &str, expected: usize) -> OrchestratorResult<()> {
        let remote = self.ctx.cloud.remote.as_ref();
        let command = self
            .ctx
            .remote_command(host, SSH_BASE_PORT, READY_NODES_COMMAND);
        let command = &command;
        wait_for(
            "ready nodes",
            self.ctx.config.polling.scale_ready,
            &self.ctx.shutdown,
            move |_| async move {
                let out = remote.execute(command).await.ok()?;
                let ready: usize = out.output.trim().parse().ok()?;
                debug!(ready, expected, "ready node count");
                (ready == expected).then_some(())
            },
        )
        .await
    }

    /// Remove nodes from the highest index down. The master is never removed.
    async fn downscale(&self, cluster: &ClusterRecord, target: u32) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let id = cluster.id.as_str();
        info!(cluster = %id, from = cluster.node_count, to = target, "removing nodes");
        let public_ip = self.provisioning.public_ip(cluster).await?;
        let keep = target as usize + 1;

        let mut mappings = ctx.store.list_vms(id)?;
        while mappings.len() > keep {
            let Some(mapping) = mappings.pop() else { break };
            if mapping.is_master() {
                break;
            }

            if let Some(vm) = ctx.cloud.vms.get(&mapping.vm_id).await?.filter(|vm| !vm.removed) {
                self.remove_from_cluster(&public_ip.address, &vm.hostname)
                    .await?;
                network_rules::remove_ssh_forward(ctx.cloud.firewall.as_ref(), &public_ip, &vm.id)
                    .await?;
                let destroyed = ctx.cloud.vms.destroy(&vm.id).await?;
                if destroyed.state != VmState::Expunging {
                    return Err(OrchestratorError::provisioning(
                        id,
                        format!("vm {} is {} after destroy", vm.id, destroyed.state),
                    ));
                }
                ctx.cloud.vms.expunge(&vm.id).await?;
            } else {
                warn!(cluster = %id, vm = %mapping.vm_id, "mapped vm already gone");
            }
            ctx.store.remove_vm(id, mapping.index)?;
            info!(cluster = %id, vm = %mapping.vm_id, index = mapping.index, "node removed");
        }

        let span = network_rules::ssh_span(&mappings);
        network_rules::rescale_ssh_range(ctx.cloud.firewall.as_ref(), &public_ip, span).await
    }

    /// Drain a node and delete it from the Kubernetes node list.
    async fn remove_from_cluster(&self, host: &str, node: &str) -> OrchestratorResult<()> {
        for command in [
            format!("sudo kubectl drain {node} --ignore-daemonsets --delete-local-data"),
            format!("sudo kubectl delete node {node}"),
        ] {
            let out = self
                .ctx
                .cloud
                .remote
                .execute(&self.ctx.remote_command(host, SSH_BASE_PORT, &command))
                .await?;
            if !out.success {
                return Err(OrchestratorError::TransientRemote(format!(
                    "`{command}` failed: {}",
                    out.output.trim()
                )));
            }
        }
        Ok(())
    }
}
