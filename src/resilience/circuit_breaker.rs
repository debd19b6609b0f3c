//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within window
//! Open → Half-Open: first call after cooldown (checked lazily, no timer)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering upstream)
//! - One mutex per breaker serializes every read and transition

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::clock::{Clock, SystemClock};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Rejection returned while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker {service} is OPEN")]
pub struct CircuitOpenError {
    pub service: String,
}

/// Read-only snapshot of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    /// Set by `force_open`; cooldown is ignored until a manual reset.
    forced: bool,
    /// Bumped on every transition; ties a probe permit to its Half-Open period.
    generation: u64,
}

impl BreakerState {
    fn closed(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            last_failure_at: None,
            forced: false,
            generation,
        }
    }
}

/// What `admit` let through.
#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    probe: bool,
}

/// Circuit breaker guarding one logical service.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerState::closed(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn threshold(&self) -> u32 {
        self.config.failure_threshold.max(1)
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        let generation = inner.generation + 1;
        match to {
            CircuitState::Open => {
                inner.state = to;
                inner.generation = generation;
                inner.opened_at = Some(self.clock.now());
                tracing::warn!(
                    service = %self.name,
                    from = from.as_str(),
                    failures = inner.failure_count,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = to;
                inner.generation = generation;
                tracing::info!(service = %self.name, "Circuit half-open, allowing probe");
            }
            CircuitState::Closed => {
                *inner = BreakerState::closed(generation);
                if from != CircuitState::Closed {
                    tracing::info!(service = %self.name, from = from.as_str(), "Circuit closed");
                }
            }
        }
        metrics::record_circuit_state(&self.name, to);
    }

    /// Performs the lazy Open → Half-Open transition. Half-Open is only ever
    /// entered by admitting its probe, so every other call is rejected there.
    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission {
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => {
                let cooldown = self.config.cooldown();
                let now = self.clock.now();
                let cooled_down = !inner.forced
                    && inner
                        .opened_at
                        .is_some_and(|at| now.saturating_duration_since(at) >= cooldown);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    Ok(Admission {
                        generation: inner.generation,
                        probe: true,
                    })
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => Err(self.open_error()),
        }
    }

    /// Ask to place a call. The caller reports the outcome through
    /// `record_success`/`record_failure`.
    pub fn allow_request(&self) -> Result<(), CircuitOpenError> {
        self.admit().map(|_| ())
    }

    /// Like `allow_request`, returning a guard that must be settled.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitOpenError> {
        let admission = self.admit()?;
        Ok(BreakerPermit {
            breaker: self.clone(),
            admission,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.on_success(&mut inner);
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.on_failure(&mut inner);
    }

    /// Apply a permit's outcome. While Half-Open only the probe of the
    /// current period decides the state.
    fn settle(&self, admission: Admission, succeeded: bool) {
        let mut inner = self.lock();
        let is_current_probe = admission.probe && admission.generation == inner.generation;
        if inner.state == CircuitState::HalfOpen && !is_current_probe {
            tracing::debug!(
                service = %self.name,
                succeeded,
                "Ignoring outcome of a call admitted before the probe"
            );
            return;
        }
        if succeeded {
            self.on_success(&mut inner);
        } else {
            self.on_failure(&mut inner);
        }
    }

    fn on_success(&self, inner: &mut BreakerState) {
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.last_failure_at = None;
            }
            CircuitState::HalfOpen => self.transition(inner, CircuitState::Closed),
            // Stragglers admitted before the circuit opened do not close it.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerState) {
        let now = self.clock.now();
        match inner.state {
            CircuitState::Closed => {
                let window = self.config.window();
                let window_expired = inner
                    .last_failure_at
                    .is_some_and(|last| now.saturating_duration_since(last) > window);
                if window_expired {
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                inner.last_failure_at = Some(now);
                if inner.failure_count >= self.threshold() {
                    self.transition(inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count = self.threshold();
                inner.last_failure_at = Some(now);
                self.transition(inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn get_stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
        }
    }

    /// Open unconditionally; stays open until `force_closed`/`reset`.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.forced = true;
        self.transition(&mut inner, CircuitState::Open);
    }

    pub fn force_closed(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn reset(&self) {
        self.force_closed();
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            service: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// A RAII guard for one admitted call.
///
/// Dropping an unsettled permit counts as a failure, so a cancelled probe
/// never leaves the breaker stuck in Half-Open.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    admission: Admission,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this call is the Half-Open trial.
    pub fn is_probe(&self) -> bool {
        self.admission.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.admission, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.admission, false);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(service = %self.breaker.name, "Call abandoned, counting as failure");
            self.breaker.settle(self.admission, false);
        }
    }
}

/// Breakers keyed by service name.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `service`, created closed on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(
                    service,
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot of every known breaker.
    pub fn all_stats(&self) -> Vec<(String, BreakerStats)> {
        let mut stats: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get_stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
