//! ClusterManager: the entry point for user-triggered cluster operations.
//!
//! Each call runs to completion on the caller's task. Long waits inside a
//! workflow are bounded polls that also stop on the shutdown signal.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::watch;

use kubeyard_cloud::CloudServices;
use kubeyard_core::ServiceConfig;
use kubeyard_state::{ClusterRecord, ClusterState, ClusterVmMapping, StateStore};

use crate::context::WorkflowContext;
use crate::create::{CreateClusterRequest, CreateWorkflow};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provisioning::ProvisioningWorkflow;
use crate::scaling::{ScaleRequest, ScalingWorkflow};
use crate::stop::StopWorkflow;
use crate::teardown::{TeardownOutcome, TeardownWorkflow};

/// Listing filter. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    /// Only Running, Stopped or Destroyed.
    pub state: Option<ClusterState>,
    /// Case-insensitive substring of the cluster name.
    pub name: Option<String>,
    /// Restrict to one owner account.
    pub account_id: Option<String>,
}

#[derive(Clone)]
pub struct ClusterManager {
    ctx: WorkflowContext,
    create: CreateWorkflow,
    provisioning: ProvisioningWorkflow,
    stop: StopWorkflow,
    scaling: ScalingWorkflow,
    teardown: TeardownWorkflow,
}

impl ClusterManager {
    pub fn new(
        store: StateStore,
        cloud: CloudServices,
        config: ServiceConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::from_context(WorkflowContext::new(store, cloud, config, shutdown))
    }

    pub fn from_context(ctx: WorkflowContext) -> Self {
        Self {
            create: CreateWorkflow::new(ctx.clone()),
            provisioning: ProvisioningWorkflow::new(ctx.clone()),
            stop: StopWorkflow::new(ctx.clone()),
            scaling: ScalingWorkflow::new(ctx.clone()),
            teardown: TeardownWorkflow::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    pub fn teardown_workflow(&self) -> &TeardownWorkflow {
        &self.teardown
    }

    pub async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> OrchestratorResult<ClusterRecord> {
        self.create.create(request).await
    }

    /// `on_create` selects the cold start of a new cluster; otherwise a
    /// stopped cluster is started again.
    pub async fn start_cluster(
        &self,
        cluster_id: &str,
        on_create: bool,
    ) -> OrchestratorResult<ClusterRecord> {
        if on_create {
            self.provisioning.cold_start(cluster_id).await
        } else {
            self.provisioning.warm_start(cluster_id).await
        }
    }

    pub async fn stop_cluster(&self, cluster_id: &str) -> OrchestratorResult<ClusterRecord> {
        self.stop.stop(cluster_id).await
    }

    pub async fn scale_cluster(
        &self,
        cluster_id: &str,
        request: &ScaleRequest,
    ) -> OrchestratorResult<ClusterRecord> {
        self.scaling.scale(cluster_id, request).await
    }

    pub async fn delete_cluster(&self, cluster_id: &str) -> OrchestratorResult<TeardownOutcome> {
        self.teardown.teardown(cluster_id).await
    }

    pub fn get_cluster(&self, cluster_id: &str) -> OrchestratorResult<ClusterRecord> {
        self.ctx.load_cluster(cluster_id)
    }

    /// Live clusters matching `filter`. A `Destroyed` state filter lists the
    /// soft-deleted ones instead.
    pub fn list_clusters(&self, filter: &ClusterFilter) -> OrchestratorResult<Vec<ClusterRecord>> {
        if let Some(state) = filter.state {
            if !matches!(
                state,
                ClusterState::Running | ClusterState::Stopped | ClusterState::Destroyed
            ) {
                return Err(OrchestratorError::Validation(format!(
                    "cannot filter clusters by state {state}; use Running, Stopped or Destroyed"
                )));
            }
        }
        let needle = filter.name.as_ref().map(|n| n.to_lowercase());

        Ok(self
            .ctx
            .store
            .list_clusters()?
            .into_iter()
            .filter(|c| match filter.state {
                Some(ClusterState::Destroyed) => c.state == ClusterState::Destroyed,
                Some(state) => !c.is_removed() && c.state == state,
                None => !c.is_removed(),
            })
            .filter(|c| {
                needle
                    .as_ref()
                    .is_none_or(|n| c.name.to_lowercase().contains(n.as_str()))
            })
            .filter(|c| {
                filter
                    .account_id
                    .as_ref()
                    .is_none_or(|a| c.owner.account_id == *a)
            })
            .collect())
    }

    /// VM map of a cluster, master first.
    pub fn cluster_vms(&self, cluster_id: &str) -> OrchestratorResult<Vec<ClusterVmMapping>> {
        self.ctx.load_cluster(cluster_id)?;
        Ok(self.ctx.store.list_vms(cluster_id)?)
    }

    /// Admin kubeconfig as YAML text.
    pub fn cluster_config(&self, cluster_id: &str) -> OrchestratorResult<String> {
        self.ctx.load_cluster(cluster_id)?;
        let encoded = self
            .ctx
            .store
            .get_details(cluster_id)?
            .and_then(|d| d.kube_config)
            .ok_or_else(|| OrchestratorError::NotFound(format!("kubeconfig of {cluster_id}")))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| OrchestratorError::Validation(format!("stored kubeconfig: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| OrchestratorError::Validation(format!("stored kubeconfig: {e}")))
    }
}
