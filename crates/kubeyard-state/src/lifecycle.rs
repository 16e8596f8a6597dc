//! Cluster lifecycle state machine.
//!
//! The transition table is fixed. A transition reads the persisted state,
//! looks up `(state, event)`, and writes the target with a compare-and-set
//! against the value it read. Every rejection leaves the record untouched.

use tracing::{debug, warn};

use crate::error::TransitionError;
use crate::store::{CasOutcome, StateStore};
use crate::types::{ClusterEvent, ClusterState};

/// Target state for `event` fired in `from`, if the table allows it.
pub fn next_state(from: ClusterState, event: ClusterEvent) -> Option<ClusterState> {
    use ClusterEvent as E;
    use ClusterState as S;

    let to = match (from, event) {
        (S::Created, E::StartRequested) => S::Starting,

        (S::Starting, E::OperationSucceeded) => S::Running,
        (S::Starting, E::OperationFailed) => S::Alert,
        (S::Starting, E::CreateFailed) => S::Error,

        (S::Running, E::StopRequested) => S::Stopping,
        (S::Running, E::ScaleUpRequested | E::ScaleDownRequested) => S::Scaling,
        (S::Running, E::FaultsDetected) => S::Alert,
        (S::Running, E::DestroyRequested) => S::Destroying,

        (S::Stopping, E::OperationSucceeded) => S::Stopped,
        (S::Stopping, E::OperationFailed) => S::Alert,

        (S::Stopped, E::StartRequested) => S::Starting,
        (S::Stopped, E::FaultsDetected) => S::Alert,
        (S::Stopped, E::DestroyRequested) => S::Destroying,

        (S::Scaling, E::OperationSucceeded) => S::Running,
        (S::Scaling, E::OperationFailed) => S::Alert,

        (S::Alert, E::RecoveryRequested) => S::Recovering,
        (S::Alert, E::DestroyRequested) => S::Destroying,

        (S::Recovering, E::OperationSucceeded) => S::Running,
        (S::Recovering, E::OperationFailed) => S::Alert,

        (S::Error, E::DestroyRequested) => S::Destroying,

        (S::Destroying, E::DestroyRequested) => S::Destroying,
        (S::Destroying, E::OperationSucceeded) => S::Destroyed,
        (S::Destroying, E::OperationFailed) => S::Error,

        _ => return None,
    };
    Some(to)
}

/// The only writer of [`ClusterRecord::state`](crate::ClusterRecord).
#[derive(Clone)]
pub struct ClusterStateMachine {
    store: StateStore,
}

impl ClusterStateMachine {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Fire `event` at a cluster and return the state it landed in.
    pub fn transition(
        &self,
        cluster_id: &str,
        event: ClusterEvent,
    ) -> Result<ClusterState, TransitionError> {
        let current = self
            .store
            .get_cluster(cluster_id)?
            .ok_or_else(|| TransitionError::NotFound(cluster_id.to_string()))?
            .state;

        let Some(target) = next_state(current, event) else {
            warn!(cluster = %cluster_id, from = %current, %event, "transition rejected");
            return Err(TransitionError::NoTransition {
                cluster: cluster_id.to_string(),
                from: current,
                event,
            });
        };

        match self
            .store
            .compare_and_set_state(cluster_id, current, target)?
        {
            CasOutcome::Applied => {
                debug!(cluster = %cluster_id, from = %current, to = %target, %event, "state transition");
                Ok(target)
            }
            CasOutcome::Stale { actual } => {
                warn!(
                    cluster = %cluster_id,
                    expected = %current,
                    %actual,
                    %event,
                    "transition lost a race"
                );
                Err(TransitionError::StaleRead {
                    cluster: cluster_id.to_string(),
                    expected: current,
                    actual,
                })
            }
        }
    }
}
