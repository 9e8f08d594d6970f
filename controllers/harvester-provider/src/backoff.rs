//! # Fibonacci Backoff
//!
//! Requeue delay for machine requests whose last reconciliation failed.
//! Delays grow more slowly than exponential backoff so a request with a
//! fixable configuration error is picked up again reasonably soon.
//!
//! Sequence in minutes: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).

use std::time::Duration;

/// Shortest failure backoff in minutes.
pub const MIN_BACKOFF_MINUTES: u64 = 1;

/// Longest failure backoff in minutes.
pub const MAX_BACKOFF_MINUTES: u64 = 10;

/// Fibonacci backoff calculator
#[derive(Debug, Clone, Copy)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_MINUTES, MAX_BACKOFF_MINUTES)
    }
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
        }
    }

    /// Backoff after `failures` consecutive failures (stateless).
    ///
    /// The first two failures wait `min_minutes`; each following one waits
    /// the sum of the previous two, capped at `max_minutes`.
    #[must_use]
    pub fn for_failures(&self, failures: u32) -> Duration {
        // 0-indexed position in the sequence
        let index = failures.saturating_sub(1);
        let mut prev_minutes = self.min_minutes;
        let mut current_minutes = self.min_minutes;

        for _ in 2..=index {
            let next_minutes = prev_minutes + current_minutes;
            prev_minutes = current_minutes;
            current_minutes = std::cmp::min(next_minutes, self.max_minutes);

            if current_minutes >= self.max_minutes {
                break;
            }
        }

        Duration::from_secs(std::cmp::min(current_minutes, self.max_minutes) * 60)
    }
}
