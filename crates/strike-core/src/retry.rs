//! Bounded exponential backoff for audit-log polling

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Most retries any schedule yields
pub const MAX_RETRIES: usize = 32;

/// Backoff schedule for polling an eventually-consistent source
///
/// The first attempt is immediate; each retry waits the next delay of
/// [`RetryPolicy::delays`]. Delays grow by `multiplier`, are capped at
/// `max_delay_ms`, and stop before their sum would exceed `total_budget_ms`
/// or their number would exceed [`MAX_RETRIES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// First delay
    pub initial_delay_ms: u64,
    /// Growth factor between delays
    pub multiplier: u32,
    /// Cap on any single delay
    pub max_delay_ms: u64,
    /// Cap on the sum of all delays
    pub total_budget_ms: u64,
}

impl RetryPolicy {
    /// Delays to wait before each retry
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut next = self.initial_delay_ms.min(self.max_delay_ms);
        let mut spent: u64 = 0;

        while next > 0 && delays.len() < MAX_RETRIES {
            let Some(total) = spent.checked_add(next) else {
                break;
            };
            if total > self.total_budget_ms {
                break;
            }
            spent = total;
            delays.push(Duration::from_millis(next));
            next = next
                .saturating_mul(u64::from(self.multiplier))
                .min(self.max_delay_ms);
        }

        delays
    }

    /// Total attempts including the immediate one
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.delays().len() + 1
    }

    /// Sum of all delays
    #[inline]
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.delays().iter().sum()
    }
}

impl Default for RetryPolicy {
    /// Attempts at 0s, 1s, 3s, 7s, 15s, 31s and 47s
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 16_000,
            total_budget_ms: 60_000,
        }
    }
}
