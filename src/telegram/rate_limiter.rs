//! Pacing for `getUpdates` calls.
//!
//! Enforces a minimum interval between polls and lets the loop push the
//! next poll further out after a transport failure or a flood wait.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Rate limiter that enforces minimum intervals between operations.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between allowed operations.
    min_interval: Duration,

    /// Earliest moment the next operation may start.
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Waits until an operation is allowed, then marks the operation as performed.
    ///
    /// Returns the duration waited (0 if no wait was needed).
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut next = self.next_allowed.lock().await;

        let wait_duration = next.map_or(Duration::ZERO, |at| {
            at.saturating_duration_since(Instant::now())
        });

        if !wait_duration.is_zero() {
            debug!("Rate limiter: waiting {:?} before next poll", wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        *next = Some(Instant::now() + self.min_interval);
        wait_duration
    }

    /// Pushes the next allowed operation at least `delay` into the future.
    pub async fn defer(&self, delay: Duration) {
        let mut next = self.next_allowed.lock().await;
        let candidate = Instant::now() + delay;
        if next.is_none_or(|at| at < candidate) {
            *next = Some(candidate);
        }
    }

    /// Returns the time remaining until the next operation is allowed.
    pub async fn time_until_allowed(&self) -> Duration {
        let next = self.next_allowed.lock().await;
        next.map_or(Duration::ZERO, |at| {
            at.saturating_duration_since(Instant::now())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_first_operation() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        assert_eq!(limiter.time_until_allowed().await, Duration::ZERO);

        let waited = limiter.wait_and_acquire().await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_rate_limiter_subsequent_operation() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        limiter.wait_and_acquire().await;

        assert!(limiter.time_until_allowed().await > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.wait_and_acquire().await;
        assert_eq!(limiter.wait_and_acquire().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_defer_extends_but_never_shortens() {
        let limiter = RateLimiter::new(Duration::ZERO);

        limiter.defer(Duration::from_secs(60)).await;
        limiter.defer(Duration::from_millis(1)).await;

        assert!(limiter.time_until_allowed().await > Duration::from_secs(30));
    }
}
