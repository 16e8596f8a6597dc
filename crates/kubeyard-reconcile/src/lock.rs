//! Named advisory locks with a bounded wait.
//!
//! One mutex per name, created on first use. Holding the returned guard
//! holds the lock; dropping it releases it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{ReconcileError, ReconcileResult};

pub const GC_LOCK: &str = "kubeyard.gc.lock";
pub const RECONCILE_LOCK: &str = "kubeyard.reconcile.lock";

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct NamedLockGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.name, "lock released");
    }
}

#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `name`, waiting at most `wait` for the current holder.
    pub async fn acquire(&self, name: &str, wait: Duration) -> ReconcileResult<NamedLockGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                debug!(lock = %name, "lock acquired");
                Ok(NamedLockGuard {
                    name: name.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => Err(ReconcileError::LockTimeout {
                name: name.to_string(),
                wait,
            }),
        }
    }
}
