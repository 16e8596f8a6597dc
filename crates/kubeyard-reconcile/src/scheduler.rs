//! Sweep scheduler. Owns the recurring background sweeps.
//!
//! Each sweep runs on its own task: wait the initial delay, then run once
//! per interval. Every run first takes the sweep's named lock with a
//! bounded wait; a run that cannot get the lock is skipped, not queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use kubeyard_core::SweepsConfig;

use crate::error::{ReconcileError, ReconcileResult};
use crate::gc::GarbageCollector;
use crate::lock::{GC_LOCK, LockRegistry, RECONCILE_LOCK};
use crate::status::StatusReconciler;

/// One recurring background job.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    fn lock_name(&self) -> &'static str;

    /// Run one pass and describe what it did.
    async fn run_once(&self) -> ReconcileResult<String>;
}

#[async_trait]
impl Sweep for GarbageCollector {
    fn name(&self) -> &'static str {
        "garbage-collector"
    }

    fn lock_name(&self) -> &'static str {
        GC_LOCK
    }

    async fn run_once(&self) -> ReconcileResult<String> {
        let report = self.sweep().await?;
        Ok(format!(
            "{} collected, {} deferred, {} failed",
            report.completed.len(),
            report.deferred.len(),
            report.failed.len()
        ))
    }
}

#[async_trait]
impl Sweep for StatusReconciler {
    fn name(&self) -> &'static str {
        "status-reconciler"
    }

    fn lock_name(&self) -> &'static str {
        RECONCILE_LOCK
    }

    async fn run_once(&self) -> ReconcileResult<String> {
        let report = self.reconcile().await?;
        Ok(format!(
            "{} faulted, {} recovered, {} errors",
            report.faulted.len(),
            report.recovered.len(),
            report.errors.len()
        ))
    }
}

/// When a sweep runs.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub interval: Duration,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct SweepScheduler {
    sweeps: Vec<(Arc<dyn Sweep>, Schedule)>,
    locks: LockRegistry,
    lock_wait: Duration,
    running: Mutex<Option<Running>>,
}

impl SweepScheduler {
    pub fn new(locks: LockRegistry, lock_wait: Duration) -> Self {
        Self {
            sweeps: Vec::new(),
            locks,
            lock_wait,
            running: Mutex::new(None),
        }
    }

    /// The garbage collector and the status reconciler on the configured
    /// schedules.
    pub fn from_config(
        config: &SweepsConfig,
        gc: GarbageCollector,
        reconciler: StatusReconciler,
    ) -> Self {
        Self::new(LockRegistry::new(), config.lock_wait)
            .with_sweep(
                Arc::new(gc),
                Schedule {
                    initial_delay: config.gc_initial_delay,
                    interval: config.gc_interval,
                },
            )
            .with_sweep(
                Arc::new(reconciler),
                Schedule {
                    initial_delay: config.reconcile_initial_delay,
                    interval: config.reconcile_interval,
                },
            )
    }

    pub fn with_sweep(mut self, sweep: Arc<dyn Sweep>, schedule: Schedule) -> Self {
        self.sweeps.push((sweep, schedule));
        self
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Spawn one task per sweep. Starting twice is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("sweeps already running");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = self
            .sweeps
            .iter()
            .map(|(sweep, schedule)| {
                let sweep = sweep.clone();
                let schedule = *schedule;
                let locks = self.locks.clone();
                let lock_wait = self.lock_wait;
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    run_sweep_loop(sweep, schedule, locks, lock_wait, shutdown).await;
                })
            })
            .collect();
        *running = Some(Running {
            shutdown_tx,
            handles,
        });
        info!(sweeps = self.sweeps.len(), "sweeps started");
    }

    /// Signal every sweep and wait for in-flight runs to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown_tx.send(true);
        for handle in running.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "sweep task ended abnormally");
            }
        }
        info!("sweeps stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

/// Run `sweep` once under its lock. A lock timeout is reported as the
/// error; the caller decides whether that matters.
pub async fn run_locked(
    sweep: &dyn Sweep,
    locks: &LockRegistry,
    lock_wait: Duration,
) -> ReconcileResult<String> {
    let _guard = locks.acquire(sweep.lock_name(), lock_wait).await?;
    sweep.run_once().await
}

async fn run_sweep_loop(
    sweep: Arc<dyn Sweep>,
    schedule: Schedule,
    locks: LockRegistry,
    lock_wait: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(sweep = sweep.name(), ?schedule, "sweep loop starting");
    let mut delay = schedule.initial_delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                match run_locked(sweep.as_ref(), &locks, lock_wait).await {
                    Ok(summary) => info!(sweep = sweep.name(), %summary, "sweep finished"),
                    Err(ReconcileError::LockTimeout { name, .. }) => {
                        debug!(sweep = sweep.name(), lock = %name, "lock busy; skipping run");
                    }
                    Err(e) => error!(sweep = sweep.name(), error = %e, "sweep failed"),
                }
                delay = schedule.interval;
            }
            _ = shutdown.changed() => {
                debug!(sweep = sweep.name(), "sweep loop shutting down");
                break;
            }
        }
    }
}
