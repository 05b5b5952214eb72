//! Restart backoff policy for crashed workers.
//!
//! The delay before respawning a worker that has already restarted
//! `restarts` times is `base * (restarts + 1)`, clamped to `ceiling`.
//! Once `max_restarts` cycles have been spent the subbot stays stopped
//! and only a fresh launch (with a new code) tries again.

use std::time::Duration;

/// Restart budget and backoff parameters.
#[derive(Clone, Copy, Debug)]
pub struct RestartPolicy {
    /// Automatic restarts before a subbot stays stopped.
    pub max_restarts: u32,
    /// Delay before the first restart.
    pub base: Duration,
    /// Maximum delay cap.
    pub ceiling: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            base: Duration::from_secs(5),
            ceiling: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Computes the delay for a worker that has restarted `restarts`
    /// times already.
    pub fn delay_for(&self, restarts: u32) -> Duration {
        self.base
            .saturating_mul(restarts.saturating_add(1))
            .min(self.ceiling)
    }
}
