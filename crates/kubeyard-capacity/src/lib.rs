//! kubeyard-capacity — placement feasibility for cluster VMs.
//!
//! Answers "can this zone hold `C` more VMs of this offering?" before any
//! VM is created. It does not pin hosts; the infrastructure layer makes the
//! real placement decision later.
//!
//! # Components
//!
//! - **`planner`**: the stacked first-fit check over a host snapshot
//! - [`CapacityPlanner`]: fetches the snapshot from a [`HostInventory`]

pub mod planner;

pub use planner::{CapacityError, DeployDestination, plan};

use std::sync::Arc;

use kubeyard_cloud::{HostInventory, ServiceOffering};

/// Runs [`plan`] against the live host inventory of a zone.
#[derive(Clone)]
pub struct CapacityPlanner {
    hosts: Arc<dyn HostInventory>,
}

impl CapacityPlanner {
    pub fn new(hosts: Arc<dyn HostInventory>) -> Self {
        Self { hosts }
    }

    pub async fn plan(
        &self,
        vm_count: u64,
        offering: &ServiceOffering,
        zone_id: &str,
    ) -> Result<DeployDestination, CapacityError> {
        let hosts = self
            .hosts
            .list_hosts(zone_id)
            .await
            .map_err(|e| CapacityError::Inventory(e.to_string()))?;
        plan(vm_count, offering, zone_id, &hosts)
    }
}
