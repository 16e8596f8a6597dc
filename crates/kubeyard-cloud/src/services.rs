//! Bundle of every collaborator the orchestrator talks to.

use std::sync::Arc;

use crate::sim::SimulatedCloud;
use crate::traits::*;

#[derive(Clone)]
pub struct CloudServices {
    pub vms: Arc<dyn VmService>,
    pub networks: Arc<dyn NetworkService>,
    pub firewall: Arc<dyn FirewallService>,
    pub certificates: Arc<dyn CertificateAuthority>,
    pub remote: Arc<dyn RemoteExec>,
    pub boot_media: Arc<dyn BootMediaService>,
    pub config: Arc<dyn ConfigStore>,
    pub hosts: Arc<dyn HostInventory>,
    pub catalog: Arc<dyn Catalog>,
    pub probe: Arc<dyn ReachabilityProbe>,
}

impl CloudServices {
    /// Route every capability to one simulated cloud.
    pub fn simulated(cloud: Arc<SimulatedCloud>, config: Arc<dyn ConfigStore>) -> Self {
        Self {
            vms: cloud.clone(),
            networks: cloud.clone(),
            firewall: cloud.clone(),
            certificates: cloud.clone(),
            remote: cloud.clone(),
            boot_media: cloud.clone(),
            config,
            hosts: cloud.clone(),
            catalog: cloud.clone(),
            probe: cloud,
        }
    }
}
