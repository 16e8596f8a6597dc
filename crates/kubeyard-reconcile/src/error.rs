//! Error types for the background sweeps.

use std::time::Duration;

use thiserror::Error;

use kubeyard_cloud::CloudError;
use kubeyard_orchestrator::OrchestratorError;
use kubeyard_state::{StateError, TransitionError};

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("lock {name} not acquired within {wait:?}")]
    LockTimeout { name: String, wait: Duration },

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("transition rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
