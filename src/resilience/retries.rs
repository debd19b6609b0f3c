//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failure is retryable (predicate over classified errors)
//! - Execute retries with exponential backoff + jitter
//! - Report the final outcome with attempt count and elapsed time
//!
//! # Design Decisions
//! - Attempts are strictly sequential; the next one starts after the delay
//! - Only the terminal failure is returned; intermediate ones are logged
//! - The sleep primitive and RNG are injectable so timing is testable

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{RetryConfig, RetryPreset};
use crate::http::classify::ClassifiedError;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::clock::{Clock, Sleeper, SystemClock, TokioSleeper};

/// Errors that expose a classification the default predicates can inspect.
pub trait Retryable {
    fn classification(&self) -> Option<&ClassifiedError>;
}

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retries network errors, timeouts, 429 and 5xx; nothing else.
pub fn default_retry_predicate<E: Retryable>(error: &E) -> bool {
    error
        .classification()
        .is_some_and(ClassifiedError::is_transient)
}

impl RetryPreset {
    /// The retry predicate this preset stands for.
    pub fn predicate<E: Retryable + 'static>(self) -> RetryPredicate<E> {
        match self {
            RetryPreset::ExternalApi => Arc::new(default_retry_predicate::<E>),
            RetryPreset::Database => Arc::new(|error: &E| {
                error
                    .classification()
                    .is_some_and(ClassifiedError::is_connection_level)
            }),
        }
    }
}

/// Value produced by a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult<T> {
    pub value: T,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    pub total_time: Duration,
}

/// What happened on one attempt.
#[derive(Debug)]
pub struct AttemptOutcome<'a, E> {
    pub attempt_number: u32,
    pub succeeded: bool,
    pub error: Option<&'a E>,
    pub elapsed: Duration,
}

/// Terminal failure: retries exhausted or the error was not retryable.
#[derive(Debug, Clone)]
pub struct RetryError<E> {
    /// Configured attempt limit (this is what the message reports).
    pub max_attempts: u32,
    /// Attempts actually made.
    pub attempts: u32,
    pub total_time: Duration,
    pub last_error: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.last_error.to_string();
        let message = if message.is_empty() { "Unknown error" } else { message.as_str() };
        write!(
            f,
            "Operation failed after {} attempts. Last error: {}",
            self.max_attempts, message
        )
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Runs fallible async operations under a retry policy.
pub struct RetryExecutor<E> {
    config: RetryConfig,
    predicate: RetryPredicate<E>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    service: Option<String>,
}

impl<E: Retryable + 'static> RetryExecutor<E> {
    /// Executor whose predicate comes from `config.policy`.
    pub fn new(config: RetryConfig) -> Self {
        let predicate = config.policy.predicate();
        Self::build(config, predicate)
    }
}

impl<E> RetryExecutor<E> {
    /// Executor with a caller-supplied predicate.
    pub fn with_predicate<P>(config: RetryConfig, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::build(config, Arc::new(predicate))
    }

    fn build(config: RetryConfig, predicate: RetryPredicate<E>) -> Self {
        Self {
            config,
            predicate,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
            service: None,
        }
    }

    /// Replace the retry predicate.
    pub fn predicate(mut self, predicate: RetryPredicate<E>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the jitter RNG for reproducible delays.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Attribute logs and retry metrics to a service.
    pub fn named(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        calculate_backoff(attempt, &self.config, &mut *rng)
    }

    fn should_retry(&self, outcome: &AttemptOutcome<'_, E>) -> bool {
        if outcome.succeeded {
            return false;
        }
        match outcome.error {
            Some(error) => {
                outcome.attempt_number < self.config.max_attempts.max(1)
                    && (self.predicate)(error)
            }
            None => false,
        }
    }

    /// Run `operation` until it succeeds, fails non-retryably, or attempts run out.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
    ) -> Result<ExecutionResult<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let service = self.service.as_deref().unwrap_or("-");
        let started = self.clock.now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_started = self.clock.now();

            let result = operation().await;

            let retry = {
                let outcome = AttemptOutcome {
                    attempt_number: attempt,
                    succeeded: result.is_ok(),
                    error: result.as_ref().err(),
                    elapsed: self.clock.now() - attempt_started,
                };
                match outcome.error {
                    Some(error) => tracing::debug!(
                        service = %service,
                        attempt = outcome.attempt_number,
                        elapsed = ?outcome.elapsed,
                        error = %error,
                        "Attempt failed"
                    ),
                    None => tracing::debug!(
                        service = %service,
                        attempt = outcome.attempt_number,
                        elapsed = ?outcome.elapsed,
                        "Attempt succeeded"
                    ),
                }
                self.should_retry(&outcome)
            };

            let error = match result {
                Ok(value) => {
                    return Ok(ExecutionResult {
                        value,
                        attempts: attempt,
                        total_time: self.clock.now() - started,
                    });
                }
                Err(error) => error,
            };

            if !retry {
                return Err(RetryError {
                    max_attempts,
                    attempts: attempt,
                    total_time: self.clock.now() - started,
                    last_error: error,
                });
            }

            let delay = self.next_delay(attempt);
            tracing::info!(
                service = %service,
                attempt,
                max_attempts,
                delay = ?delay,
                error = %error,
                "Retrying operation"
            );
            if let Some(name) = &self.service {
                metrics::record_retry(name);
            }
            self.sleeper.sleep(delay).await;
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Wrap `f` so every call runs under `executor`.
///
/// The returned function takes the same argument (use a tuple for several)
/// and yields only the value on success; attempt metadata is discarded.
pub fn with_retry<A, T, E, F, Fut>(
    f: F,
    executor: RetryExecutor<E>,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, RetryError<E>>>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let f = Arc::new(f);
    let executor = Arc::new(executor);
    move |args: A| -> BoxFuture<'static, Result<T, RetryError<E>>> {
        let f = f.clone();
        let executor = executor.clone();
        Box::pin(async move {
            executor
                .execute(|| (*f)(args.clone()))
                .await
                .map(|result| result.value)
        })
    }
}
