//! Fixed-interval request throttle shared by every remote call of a run.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces calls at least `interval` apart, across all tasks sharing it.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter admitting `rps` calls per second. Zero disables throttling.
    pub fn per_second(rps: f64) -> Self {
        if rps <= 0.0 {
            return RateLimiter::unlimited();
        }
        RateLimiter::new(Duration::from_secs_f64(1.0 / rps))
    }

    pub fn unlimited() -> Self {
        RateLimiter::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next free slot.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        // Holding the lock while sleeping queues the other callers behind us.
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            tokio::time::sleep_until(slot).await;
        }
        *next_slot = Some(Instant::now() + self.interval);
    }
}
