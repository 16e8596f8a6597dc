//! Orchestrator error types.

use thiserror::Error;

use kubeyard_capacity::CapacityError;
use kubeyard_cloud::CloudError;
use kubeyard_state::{StateError, TransitionError};

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad input; nothing was mutated.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Operation illegal for the cluster's state or ownership.
    #[error("operation not permitted: {0}")]
    Permission(String),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// A workflow step failed after the failure was recorded on the cluster.
    #[error("cluster {cluster}: {reason}")]
    Provisioning { cluster: String, reason: String },

    /// A bounded poll ran out of attempts or was cancelled.
    #[error("remote operation did not complete: {0}")]
    TransientRemote(String),

    #[error("cluster {0} not found")]
    NotFound(String),

    /// A concurrent writer moved the cluster state first.
    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),
}

impl OrchestratorError {
    pub fn provisioning(cluster: &str, reason: impl std::fmt::Display) -> Self {
        Self::Provisioning {
            cluster: cluster.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotFound(id) => Self::NotFound(id),
            err @ TransitionError::NoTransition { .. } => Self::Permission(err.to_string()),
            err @ TransitionError::StaleRead { .. } => Self::Conflict(err.to_string()),
            TransitionError::Store(e) => Self::State(e),
        }
    }
}
