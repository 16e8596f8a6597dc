//! Bounded retry policy for slow remote operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times to try, and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "crate::duration::serde_str")]
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on wall time spent sleeping between attempts.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }
}
