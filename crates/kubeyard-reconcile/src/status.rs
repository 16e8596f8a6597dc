//! Status reconciler: compares persisted cluster state with the live VMs.
//!
//! Independent passes, each isolating per-cluster errors:
//!
//! 1. Running clusters that drifted fire `FaultsDetected` (→ Alert).
//! 2. Stopped clusters that drifted fire `FaultsDetected` (→ Alert).
//! 3. Alert clusters that look healthy again fire `RecoveryRequested`
//!    then `OperationSucceeded` (→ Running).
//! 4. Clusters left in Recovering by an interrupted recovery are settled:
//!    `OperationSucceeded` when healthy, `OperationFailed` (→ Alert) when not.
//!
//! A cluster is in its desired state when the VM map holds exactly
//! `node_count + 1` entries and every mapped VM is live in the matching
//! VM state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use kubeyard_cloud::{VmService, VmState};
use kubeyard_state::{
    ClusterEvent, ClusterId, ClusterRecord, ClusterState, ClusterStateMachine, StateStore,
};

use crate::error::ReconcileResult;

/// Clusters moved by one reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Sent to Alert.
    pub faulted: Vec<ClusterId>,
    /// Brought back from Alert to Running.
    pub recovered: Vec<ClusterId>,
    pub errors: Vec<(ClusterId, String)>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.faulted.is_empty() && self.recovered.is_empty() && self.errors.is_empty()
    }
}

fn vm_state_for(state: ClusterState) -> Option<VmState> {
    match state {
        ClusterState::Running => Some(VmState::Running),
        ClusterState::Stopped => Some(VmState::Stopped),
        _ => None,
    }
}

#[derive(Clone)]
pub struct StatusReconciler {
    store: StateStore,
    machine: ClusterStateMachine,
    vms: Arc<dyn VmService>,
}

impl StatusReconciler {
    pub fn new(store: StateStore, vms: Arc<dyn VmService>) -> Self {
        Self {
            machine: ClusterStateMachine::new(store.clone()),
            store,
            vms,
        }
    }

    /// Whether the live VMs match `state` (Running or Stopped).
    pub async fn is_desired_state(
        &self,
        cluster: &ClusterRecord,
        state: ClusterState,
    ) -> ReconcileResult<bool> {
        let Some(wanted) = vm_state_for(state) else {
            return Ok(false);
        };
        let mappings = self.store.list_vms(&cluster.id)?;
        if mappings.len() != cluster.expected_vm_count() {
            debug!(
                cluster = %cluster.id,
                mapped = mappings.len(),
                expected = cluster.expected_vm_count(),
                "vm count mismatch"
            );
            return Ok(false);
        }
        for mapping in &mappings {
            match self.vms.get(&mapping.vm_id).await? {
                Some(vm) if !vm.removed && vm.state == wanted => {}
                other => {
                    debug!(
                        cluster = %cluster.id,
                        vm = %mapping.vm_id,
                        state = ?other.map(|vm| vm.state),
                        "vm not in desired state"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub async fn reconcile(&self) -> ReconcileResult<DriftReport> {
        let mut report = DriftReport::default();

        for state in [ClusterState::Running, ClusterState::Stopped] {
            for cluster in self.store.list_clusters_in_state(state)? {
                if let Err(e) = self.check_drift(&cluster, state, &mut report).await {
                    warn!(cluster = %cluster.id, error = %e, "drift check failed");
                    report.errors.push((cluster.id.clone(), e.to_string()));
                }
            }
        }

        for cluster in self.store.list_clusters_in_state(ClusterState::Alert)? {
            if let Err(e) = self.try_recover(&cluster, &mut report).await {
                warn!(cluster = %cluster.id, error = %e, "recovery failed");
                report.errors.push((cluster.id.clone(), e.to_string()));
            }
        }

        for cluster in self.store.list_clusters_in_state(ClusterState::Recovering)? {
            if let Err(e) = self.settle_recovery(&cluster, &mut report).await {
                warn!(cluster = %cluster.id, error = %e, "recovery settle failed");
                report.errors.push((cluster.id.clone(), e.to_string()));
            }
        }

        Ok(report)
    }

    async fn check_drift(
        &self,
        cluster: &ClusterRecord,
        state: ClusterState,
        report: &mut DriftReport,
    ) -> ReconcileResult<()> {
        if self.is_desired_state(cluster, state).await? {
            return Ok(());
        }
        self.machine
            .transition(&cluster.id, ClusterEvent::FaultsDetected)?;
        warn!(cluster = %cluster.id, name = %cluster.name, was = %state, "cluster drifted; raised alert");
        report.faulted.push(cluster.id.clone());
        Ok(())
    }

    async fn try_recover(
        &self,
        cluster: &ClusterRecord,
        report: &mut DriftReport,
    ) -> ReconcileResult<()> {
        if !self.is_desired_state(cluster, ClusterState::Running).await? {
            return Ok(());
        }
        self.machine
            .transition(&cluster.id, ClusterEvent::RecoveryRequested)?;
        self.machine
            .transition(&cluster.id, ClusterEvent::OperationSucceeded)?;
        info!(cluster = %cluster.id, name = %cluster.name, "cluster recovered");
        report.recovered.push(cluster.id.clone());
        Ok(())
    }

    async fn settle_recovery(
        &self,
        cluster: &ClusterRecord,
        report: &mut DriftReport,
    ) -> ReconcileResult<()> {
        if self.is_desired_state(cluster, ClusterState::Running).await? {
            self.machine
                .transition(&cluster.id, ClusterEvent::OperationSucceeded)?;
            info!(cluster = %cluster.id, name = %cluster.name, "interrupted recovery completed");
            report.recovered.push(cluster.id.clone());
        } else {
            self.machine
                .transition(&cluster.id, ClusterEvent::OperationFailed)?;
            warn!(cluster = %cluster.id, name = %cluster.name, "interrupted recovery failed; back to alert");
            report.faulted.push(cluster.id.clone());
        }
        Ok(())
    }
}
