//! Errors reported by infrastructure collaborators.

use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("operation rejected: {0}")]
    Rejected(String),

    #[error("remote execution failed: {0}")]
    Remote(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
