//! kubeyard.toml configuration parser.
//!
//! Every section is optional; missing fields fall back to the production
//! defaults (e.g. 30 attempts × 60s for the API server reachability poll).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::DEFAULT_SSH_USER;

/// Well-known keys of the `[settings]` table.
pub mod settings {
    pub const TEMPLATE_NAME: &str = "cluster.template.name";
    pub const MASTER_BOOT_CONFIG: &str = "cluster.master.cloudconfig";
    pub const NODE_BOOT_CONFIG: &str = "cluster.node.cloudconfig";
    pub const NETWORK_OFFERING: &str = "cluster.network.offering";
    pub const BOOTSTRAP_MEDIA: &str = "cluster.bootstrap.media";
    pub const MANAGEMENT_SSH_KEY: &str = "cluster.management.ssh.public.key";
    pub const DEVELOPER: &str = "developer";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub settings: HashMap<String, String>,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub sweeps: SweepsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub key_file: Option<PathBuf>,
    #[serde(with = "crate::duration::serde_str")]
    pub connect_timeout: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub read_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: DEFAULT_SSH_USER.to_string(),
            key_file: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// One policy per bounded polling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Cold start: API server TCP reachability.
    pub api_server: RetryPolicy,
    /// Warm start: API server TCP reachability.
    pub warm_api_server: RetryPolicy,
    /// Admin kubeconfig retrieval over SSH.
    pub kubeconfig: RetryPolicy,
    /// Dashboard add-on readiness.
    pub addon: RetryPolicy,
    /// Ready-node count after upscale.
    pub scale_ready: RetryPolicy,
    /// VM removal before network destroy.
    pub vm_removal: RetryPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            api_server: RetryPolicy::new(30, Duration::from_secs(60)),
            warm_api_server: RetryPolicy::new(10, Duration::from_secs(50)),
            kubeconfig: RetryPolicy::new(5, Duration::from_secs(1)),
            addon: RetryPolicy::new(30, Duration::from_secs(10)),
            scale_ready: RetryPolicy::new(12, Duration::from_secs(15)),
            vm_removal: RetryPolicy::new(3, Duration::from_secs(10)),
        }
    }
}

impl PollingConfig {
    /// Every loop gets the same small policy. Used by tests and the sandbox.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            api_server: policy,
            warm_api_server: policy,
            kubeconfig: policy,
            addon: policy,
            scale_ready: policy,
            vm_removal: policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepsConfig {
    #[serde(with = "crate::duration::serde_str")]
    pub gc_interval: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub gc_initial_delay: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub reconcile_interval: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub reconcile_initial_delay: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub lock_wait: Duration,
}

impl Default for SweepsConfig {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs(300),
            gc_initial_delay: Duration::from_secs(300),
            reconcile_interval: Duration::from_secs(30),
            reconcile_initial_delay: Duration::from_secs(300),
            lock_wait: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_cluster_size: u32,
    /// Minimum cpu count × speed of a cluster offering.
    pub min_cpu_mhz: u64,
    pub min_ram_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_cluster_size: 100,
            min_cpu_mhz: 200,
            min_ram_mb: 64,
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        let s = toml::to_string_pretty(self)?;
        Ok(s)
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}
