//! kubeyard-reconcile — background sweeps for Kubeyard.
//!
//! Two recurring jobs keep persisted cluster state honest without a user
//! in the loop. Each runs under its own named lock so at most one instance
//! of a job is active at a time; the two jobs may overlap each other and
//! any user-triggered workflow.
//!
//! # Architecture
//!
//! ```text
//! SweepScheduler (start / stop, watch shutdown)
//!   ├── GarbageCollector   ── kubeyard.gc.lock        (every 300s)
//!   │     └── TeardownWorkflow per GC-pending cluster
//!   └── StatusReconciler   ── kubeyard.reconcile.lock (every 30s)
//!         ├── Running / Stopped drift  → FaultsDetected
//!         └── Alert back to healthy    → RecoveryRequested, OperationSucceeded
//! ```
//!
//! Reconciler transitions use the same compare-and-set as the workflows, so
//! a pass that races a user operation loses cleanly and tries again next
//! interval.

pub mod error;
pub mod gc;
pub mod lock;
pub mod scheduler;
pub mod status;

pub use error::{ReconcileError, ReconcileResult};
pub use gc::{GarbageCollector, GcReport};
pub use lock::{GC_LOCK, LockRegistry, NamedLockGuard, RECONCILE_LOCK};
pub use scheduler::{Schedule, Sweep, SweepScheduler, run_locked};
pub use status::{DriftReport, StatusReconciler};
