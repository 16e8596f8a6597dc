//! kubeyard-orchestrator — cluster lifecycle workflows.
//!
//! Drives clusters from creation to deletion on top of the collaborator
//! contracts in `kubeyard-cloud`. Every state change goes through the
//! [`ClusterStateMachine`](kubeyard_state::ClusterStateMachine); a failing
//! step records its failure event before the error reaches the caller.
//!
//! # Architecture
//!
//! ```text
//! ClusterManager
//!   ├── CreateWorkflow        (validate, persist Cluster + ClusterDetails)
//!   ├── ProvisioningWorkflow  (cold start, warm start)
//!   ├── StopWorkflow
//!   ├── ScalingWorkflow       (offering change, add / remove nodes)
//!   └── TeardownWorkflow      (resumable delete, GC hand-off)
//!         │
//!         └── WorkflowContext: StateStore, state machine, CloudServices,
//!             CapacityPlanner, ServiceConfig, shutdown signal
//! ```

pub mod boot_config;
pub mod context;
pub mod create;
pub mod error;
pub mod manager;
pub mod network_rules;
pub mod poll;
pub mod provisioning;
pub mod scaling;
pub mod stop;
pub mod teardown;

pub use context::WorkflowContext;
pub use create::{CreateClusterRequest, CreateWorkflow};
pub use error::{OrchestratorError, OrchestratorResult};
pub use manager::{ClusterFilter, ClusterManager};
pub use provisioning::ProvisioningWorkflow;
pub use scaling::{ScaleRequest, ScalingWorkflow};
pub use stop::StopWorkflow;
pub use teardown::{TeardownOutcome, TeardownWorkflow};
