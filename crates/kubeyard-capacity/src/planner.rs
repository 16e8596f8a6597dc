//! Stacked first-fit capacity check.
//!
//! For each of the `C` requested VMs, hosts are scanned in inventory order
//! and the first host that can hold one more instance on top of what this
//! plan already reserved on it takes the reservation. A host holds `n`
//! instances when `used + n × request ≤ total × overcommit` for both cpu and
//! memory. The plan fails as soon as one VM finds no host.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use kubeyard_cloud::{HostCapacity, ServiceOffering};

/// Zone-level destination; no host is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployDestination {
    pub zone_id: String,
}

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error(
        "cannot find enough capacity in zone {zone_id} (requested cpu={cpu_mhz} MHz memory={memory_mb} MiB)"
    )]
    Insufficient {
        zone_id: String,
        cpu_mhz: u64,
        memory_mb: u64,
    },

    #[error("host inventory unavailable: {0}")]
    Inventory(String),
}

fn fits(host: &HostCapacity, cpu_mhz: u64, memory_mb: u64) -> bool {
    let cpu_limit = host.cpu_total_mhz as f64 * host.cpu_overcommit;
    let memory_limit = host.memory_total_mb as f64 * host.memory_overcommit;
    (host.cpu_used_mhz + cpu_mhz) as f64 <= cpu_limit
        && (host.memory_used_mb + memory_mb) as f64 <= memory_limit
}

/// Check that `vm_count` instances of `offering` fit on `hosts`.
pub fn plan(
    vm_count: u64,
    offering: &ServiceOffering,
    zone_id: &str,
    hosts: &[HostCapacity],
) -> Result<DeployDestination, CapacityError> {
    let cpu_requested = offering.cpu_mhz();
    let ram_requested = offering.ram_mb;
    let mut reserved: HashMap<&str, u64> = HashMap::new();

    for i in 1..=vm_count {
        let found = hosts.iter().filter(|h| h.zone_id == zone_id).find(|h| {
            let next = reserved.get(h.id.as_str()).copied().unwrap_or(0) + 1;
            fits(h, cpu_requested * next, ram_requested * next)
        });
        match found {
            Some(host) => {
                let count = reserved.entry(host.id.as_str()).or_insert(0);
                *count += 1;
                debug!(host = %host.id, reserved = *count, vm = i, "reserved capacity");
            }
            None => {
                let err = CapacityError::Insufficient {
                    zone_id: zone_id.to_string(),
                    cpu_mhz: cpu_requested * vm_count,
                    memory_mb: ram_requested * vm_count,
                };
                warn!(zone = %zone_id, vm = i, "{err}");
                return Err(err);
            }
        }
    }

    debug!(zone = %zone_id, vm_count, "suitable hosts found");
    Ok(DeployDestination {
        zone_id: zone_id.to_string(),
    })
}
