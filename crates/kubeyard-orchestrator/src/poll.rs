//! Bounded, cancellable polling.
//!
//! Every slow remote wait in the workflows (API server reachability,
//! kubeconfig retrieval, add-on readiness, node readiness, VM removal) goes
//! through [`wait_for`]. A poll ends on the first successful check, after
//! `policy.attempts` checks, once the policy's time budget is spent, or when
//! the shutdown signal flips to `true`.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use kubeyard_core::RetryPolicy;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Run `check` until it yields a value.
///
/// `check` receives the 1-based attempt number. Exhaustion and
/// cancellation both surface as [`OrchestratorError::TransientRemote`].
pub async fn wait_for<T, F, Fut>(
    what: &str,
    policy: RetryPolicy,
    shutdown: &watch::Receiver<bool>,
    mut check: F,
) -> OrchestratorResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut shutdown = shutdown.clone();
    let deadline = Instant::now() + policy.budget();

    for attempt in 1..=policy.attempts {
        if *shutdown.borrow() {
            return Err(cancelled(what));
        }
        if let Some(value) = check(attempt).await {
            return Ok(value);
        }
        debug!(%what, attempt, attempts = policy.attempts, "not ready yet");
        if attempt == policy.attempts || Instant::now() >= deadline {
            break;
        }
        if sleep_or_shutdown(policy.interval, &mut shutdown).await {
            return Err(cancelled(what));
        }
    }

    Err(OrchestratorError::TransientRemote(format!(
        "{what}: gave up after {} attempts",
        policy.attempts
    )))
}

fn cancelled(what: &str) -> OrchestratorError {
    OrchestratorError::TransientRemote(format!("{what}: cancelled by shutdown"))
}

/// Sleep for `interval`; returns true if shutdown was signalled first.
async fn sleep_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => continue,
                // Sender gone: nobody can cancel any more.
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
