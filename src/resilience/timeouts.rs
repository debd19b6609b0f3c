//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap transport calls and whole client calls with a deadline
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and classify as `Timeout`
//! - Cancellation is drop-based; breaker permits and limiter slots settle on drop

use std::future::Future;

use thiserror::Error;
use tokio::time::Instant;

/// The deadline passed before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Run `future` until `deadline`; no deadline means wait forever.
pub async fn with_deadline<F>(
    deadline: Option<Instant>,
    future: F,
) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| DeadlineExceeded),
        None => Ok(future.await),
    }
}

/// The earlier of two optional deadlines.
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_completes_before_deadline() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let result = with_deadline(Some(deadline), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_future_times_out() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_millis(100);
        let result = with_deadline(Some(deadline), slow).await;
        assert_eq!(result, Err(DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_waits() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "done"
        };
        assert_eq!(with_deadline(None, slow).await, Ok("done"));
    }

    #[test]
    fn test_earliest() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest(Some(now), Some(later)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(Some(now), None), Some(now));
        assert_eq!(earliest(None, None), None);
    }
}
