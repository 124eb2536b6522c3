//! Delay policies for rate-limit signals and transient transport failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff applied while the remote keeps signalling rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Delay after the first consecutive rate-limit signal, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive signals after which the video is given up on.
    pub max_consecutive: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            max_consecutive: 6,
        }
    }
}

impl RateLimitPolicy {
    /// Delay before retrying after `hits` consecutive rate-limit signals.
    ///
    /// `base * 2^(hits - 1)`, capped at `max_delay_ms`; zero hits means no delay.
    pub fn delay_for(&self, hits: u32) -> Duration {
        if hits == 0 {
            return Duration::ZERO;
        }

        let factor = 1u64.checked_shl(hits - 1).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }

    pub fn is_exhausted(&self, hits: u32) -> bool {
        hits >= self.max_consecutive
    }
}

/// Linear backoff for transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay_step_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_step_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_step_ms.saturating_mul(attempt as u64))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}
