//! Outbound rate limiting.
//!
//! # Responsibilities
//! - Remember, per service, when the last call was dispatched
//! - Delay a dispatch until the minimum interval since the previous one has passed
//!
//! # Design Decisions
//! - One async mutex per service: waiters queue in FIFO order and cannot
//!   dispatch simultaneously
//! - The timestamp is written only after the wait completes, so a cancelled
//!   wait leaves the previous dispatch time untouched
//! - State is shared by every client holding the same limiter

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::clock::{Clock, Sleeper, SystemClock, TokioSleeper};

/// Enforces a minimum spacing between dispatches to each service.
pub struct RateLimiter {
    default_interval: Duration,
    intervals: DashMap<String, Duration>,
    last_dispatch: DashMap<String, Arc<Mutex<Option<Instant>>>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self::with_time(default_interval, Arc::new(SystemClock), Arc::new(TokioSleeper))
    }

    pub fn with_time(
        default_interval: Duration,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            default_interval,
            intervals: DashMap::new(),
            last_dispatch: DashMap::new(),
            clock,
            sleeper,
        }
    }

    /// Override the minimum interval for one service.
    pub fn set_interval(&self, service: &str, interval: Duration) {
        self.intervals.insert(service.to_string(), interval);
    }

    pub fn interval(&self, service: &str) -> Duration {
        self.intervals
            .get(service)
            .map(|entry| *entry.value())
            .unwrap_or(self.default_interval)
    }

    fn slot(&self, service: &str) -> Arc<Mutex<Option<Instant>>> {
        if let Some(slot) = self.last_dispatch.get(service) {
            return slot.clone();
        }
        self.last_dispatch
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Wait for a dispatch slot and claim it. Returns how long the caller waited.
    pub async fn acquire(&self, service: &str) -> Duration {
        let interval = self.interval(service);
        let slot = self.slot(service);
        let mut last = slot.lock().await;

        let mut waited = Duration::ZERO;
        if let Some(previous) = *last {
            let since = self.clock.now().saturating_duration_since(previous);
            if since < interval {
                waited = interval - since;
                tracing::debug!(
                    service = %service,
                    wait = ?waited,
                    "Rate limited, waiting for slot"
                );
                metrics::record_rate_limit_wait(service);
                self.sleeper.sleep(waited).await;
            }
        }

        *last = Some(self.clock.now());
        waited
    }

    /// When the last call to `service` was dispatched, if any.
    pub async fn last_dispatch(&self, service: &str) -> Option<Instant> {
        let slot = self.last_dispatch.get(service).map(|entry| entry.value().clone())?;
        let last = *slot.lock().await;
        last
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_interval", &self.default_interval)
            .field("services", &self.last_dispatch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        assert_eq!(limiter.acquire("papers").await, Duration::ZERO);
        assert!(limiter.last_dispatch("papers").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();

        limiter.acquire("papers").await;
        limiter.acquire("papers").await;
        limiter.acquire("papers").await;

        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_remaining_interval_is_waited() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.acquire("papers").await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let waited = limiter.acquire("papers").await;
        assert_eq!(waited, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire("papers").await;
        limiter.acquire("reviewers").await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_service_interval_override() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.set_interval("papers", Duration::from_millis(250));

        limiter.acquire("papers").await;
        assert_eq!(limiter.acquire("papers").await, Duration::from_millis(250));
        limiter.acquire("reviewers").await;
        assert_eq!(limiter.acquire("reviewers").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_queue() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
        let start = Instant::now();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire("papers").await;
                    Instant::now()
                })
            })
            .collect();

        let mut dispatched = Vec::new();
        for task in tasks {
            dispatched.push(task.await.unwrap());
        }
        dispatched.sort();

        for pair in dispatched.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_releases_slot() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.acquire("papers").await;
        let first = limiter.last_dispatch("papers").await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire("papers")).await;
        assert!(cancelled.is_err());
        assert_eq!(limiter.last_dispatch("papers").await, first);

        let waited = tokio::time::timeout(Duration::from_secs(1), limiter.acquire("papers"))
            .await
            .unwrap();
        assert_eq!(waited, Duration::from_millis(400));
    }
}
