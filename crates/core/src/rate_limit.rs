//! Process-wide rate-limit bookkeeping shared by every fetch session of a batch.

use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

/// Shared by `Arc` between concurrent sessions.
///
/// A rate-limit signal seen by one session raises the cooldown deadline that
/// every other session waits out before its next request.
pub struct RateLimitState {
    epoch: Instant,
    consecutive: AtomicU32,
    total: AtomicU64,
    /// Milliseconds since `epoch` before which no request should be issued.
    cooldown_until_ms: AtomicU64,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            consecutive: AtomicU32::new(0),
            total: AtomicU64::new(0),
            cooldown_until_ms: AtomicU64::new(0),
        }
    }

    /// Record a limit signal and return the process-wide consecutive count.
    pub fn record_limit(&self) -> u32 {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.consecutive.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A page went through; the remote is no longer throttling us.
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Release);
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Push the shared cooldown deadline to at least `now + delay`.
    pub fn extend_cooldown(&self, delay: Duration) {
        let until = self.now_ms().saturating_add(delay.as_millis() as u64);
        self.cooldown_until_ms.fetch_max(until, Ordering::AcqRel);
    }

    pub fn cooldown_remaining(&self) -> Duration {
        let until = self.cooldown_until_ms.load(Ordering::Acquire);
        Duration::from_millis(until.saturating_sub(self.now_ms()))
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}
