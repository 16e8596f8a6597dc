//! Error types for the Kubeyard state store.

use thiserror::Error;

use crate::types::{ClusterEvent, ClusterState};

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

/// Why a lifecycle transition was not applied.
///
/// None of these leave the persisted state changed.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("cluster {0} not found")]
    NotFound(String),

    #[error("cluster {cluster}: no transition from {from} on {event}")]
    NoTransition {
        cluster: String,
        from: ClusterState,
        event: ClusterEvent,
    },

    #[error("cluster {cluster}: state moved from {expected} to {actual} before write")]
    StaleRead {
        cluster: String,
        expected: ClusterState,
        actual: ClusterState,
    },

    #[error(transparent)]
    Store(#[from] StateError),
}
