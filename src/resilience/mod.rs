//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to upstream:
//!     → circuit_breaker.rs (fail fast if the service is OPEN)
//!     → retries.rs (attempt loop, retry predicate)
//!         → rate_limit.rs (wait for a dispatch slot)
//!         → timeouts.rs (enforce per-attempt and per-call deadlines)
//!         → On failure: backoff.rs (delay before next attempt)
//!     → circuit_breaker.rs (record success / failure of the whole call)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every transport call has a deadline
//! - Circuit breaker prevents cascading failures; its rejections are never retried
//! - Time is injected through clock.rs so every policy is testable without real delays

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod rate_limit;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerStats, CircuitBreaker, CircuitBreakerRegistry, CircuitOpenError, CircuitState,
};
pub use rate_limit::RateLimiter;
pub use retries::{with_retry, ExecutionResult, RetryError, RetryExecutor, Retryable};
