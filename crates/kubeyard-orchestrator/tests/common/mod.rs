//! Shared fixtures: a sandbox cloud, boot-config templates on disk and a
//! manager with millisecond polling.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use kubeyard_cloud::{CloudServices, SimulatedCloud, StaticConfigStore};
use kubeyard_core::{PollingConfig, RetryPolicy, ServiceConfig, settings};
use kubeyard_orchestrator::{ClusterManager, CreateClusterRequest};
use kubeyard_state::{ClusterRecord, Owner, StateStore};

pub const MASTER_TEMPLATE: &str = "\
#cloud-config
write-files:
  - path: /etc/kubernetes/pki/apiserver.crt
    content: |
      {{ k8s_master.apiserver.crt }}
  - path: /etc/kubernetes/pki/apiserver.key
    content: |
      {{ k8s_master.apiserver.key }}
  - path: /etc/kubernetes/pki/ca.crt
    content: |
      {{ k8s_master.ca.crt }}
ssh_authorized_keys:
  {{ k8s_master.ms.ssh.pub.key }}
runcmd:
  - kubeadm init --token {{ k8s_master.cluster.token }} {{ k8s_master.cluster.ip }}
";

pub const NODE_TEMPLATE: &str = "\
#cloud-config
write-files:
  - path: /etc/kubernetes/node.env
    content: |
      MASTER={{ k8s_master.default_ip }}
runcmd:
  - kubeadm join --token {{ k8s_master.cluster.token }} {{ k8s_master.default_ip }}:6443
";

pub struct Harness {
    pub cloud: Arc<SimulatedCloud>,
    pub store: StateStore,
    pub manager: ClusterManager,
    pub shutdown: watch::Sender<bool>,
    _templates: TempDir,
}

pub fn test_config(templates: &TempDir) -> ServiceConfig {
    let master = templates.path().join("k8s-master.yml");
    let node = templates.path().join("k8s-node.yml");
    std::fs::write(&master, MASTER_TEMPLATE).unwrap();
    std::fs::write(&node, NODE_TEMPLATE).unwrap();

    let mut config = ServiceConfig::default();
    for (key, value) in [
        (settings::TEMPLATE_NAME, "coreos-kubernetes".to_string()),
        (settings::MASTER_BOOT_CONFIG, master.display().to_string()),
        (settings::NODE_BOOT_CONFIG, node.display().to_string()),
        (settings::NETWORK_OFFERING, "DefaultIsolatedNetworkOffering".to_string()),
        (settings::BOOTSTRAP_MEDIA, "k8s-bootstrap".to_string()),
        (settings::MANAGEMENT_SSH_KEY, "ssh-rsa AAAAmanagement".to_string()),
    ] {
        config.settings.insert(key.to_string(), value);
    }
    config.polling = PollingConfig::uniform(RetryPolicy::new(3, Duration::from_millis(5)));
    config
}

pub async fn harness() -> Harness {
    let templates = tempfile::tempdir().unwrap();
    let config = test_config(&templates);
    let cloud = Arc::new(SimulatedCloud::sandbox().await);
    let store = StateStore::open_in_memory().unwrap();
    let services = CloudServices::simulated(
        cloud.clone(),
        Arc::new(StaticConfigStore::from(&config)),
    );
    let (shutdown, rx) = watch::channel(false);
    let manager = ClusterManager::new(store.clone(), services, config, rx);
    Harness {
        cloud,
        store,
        manager,
        shutdown,
        _templates: templates,
    }
}

pub fn request(name: &str, size: u32) -> CreateClusterRequest {
    CreateClusterRequest {
        name: name.to_string(),
        description: format!("{name} test cluster"),
        zone_id: "zone-1".to_string(),
        service_offering_id: "small".to_string(),
        owner: Owner {
            account_id: "acct-1".to_string(),
            domain_id: "root".to_string(),
        },
        size,
        ..Default::default()
    }
}

/// Create and cold-start a cluster.
pub async fn running_cluster(h: &Harness, name: &str, size: u32) -> ClusterRecord {
    let created = h.manager.create_cluster(&request(name, size)).await.unwrap();
    h.manager.start_cluster(&created.id, true).await.unwrap()
}

/// SSH ingress range `(start, end)` currently open, if any.
pub async fn ssh_range(cloud: &SimulatedCloud) -> Option<(u16, u16)> {
    cloud
        .ingress_rules()
        .await
        .iter()
        .find(|r| r.start_port == 2222)
        .map(|r| (r.start_port, r.end_port))
}

pub async fn forwarded_ports(cloud: &SimulatedCloud) -> Vec<u16> {
    let mut ports: Vec<u16> = cloud
        .port_forwards()
        .await
        .iter()
        .map(|f| f.public_port)
        .collect();
    ports.sort();
    ports
}
