//! Garbage collector for clusters whose teardown was deferred.

use tracing::{info, warn};

use kubeyard_orchestrator::{TeardownOutcome, TeardownWorkflow};
use kubeyard_state::{ClusterId, StateStore};

use crate::error::ReconcileResult;

/// Per-cluster results of one GC sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub completed: Vec<ClusterId>,
    pub deferred: Vec<ClusterId>,
    pub failed: Vec<(ClusterId, String)>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.deferred.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct GarbageCollector {
    store: StateStore,
    teardown: TeardownWorkflow,
}

impl GarbageCollector {
    pub fn new(store: StateStore, teardown: TeardownWorkflow) -> Self {
        Self { store, teardown }
    }

    /// Retry teardown of every GC-pending cluster. One cluster failing
    /// never stops the others.
    pub async fn sweep(&self) -> ReconcileResult<GcReport> {
        let mut report = GcReport::default();
        for cluster in self.store.list_gc_pending()? {
            match self.teardown.teardown(&cluster.id).await {
                Ok(TeardownOutcome::Completed) => {
                    info!(cluster = %cluster.id, name = %cluster.name, "garbage collected");
                    report.completed.push(cluster.id);
                }
                Ok(TeardownOutcome::Deferred { reason }) => {
                    warn!(cluster = %cluster.id, %reason, "still not collectable");
                    report.deferred.push(cluster.id);
                }
                Err(e) => {
                    warn!(cluster = %cluster.id, error = %e, "garbage collection failed");
                    report.failed.push((cluster.id, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
