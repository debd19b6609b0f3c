//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for one client.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a resilient service client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Logical upstream name; qualifies every error message and telemetry record.
    pub service_name: String,

    /// Base URL that request paths are joined onto.
    pub base_url: String,

    /// Per-attempt transport deadline in milliseconds.
    pub timeout_ms: u64,

    /// Minimum spacing between dispatches to this service in milliseconds.
    pub rate_limit_delay_ms: u64,

    /// Client identifier sent as `x-client-id` on every request.
    pub client_id: String,

    /// Default headers merged under per-call headers.
    pub headers: BTreeMap<String, String>,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Request telemetry buffer settings.
    pub telemetry: TelemetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: "upstream".to_string(),
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 10_000,
            rate_limit_delay_ms: 0,
            client_id: concat!("resilient-client/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: BTreeMap::new(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            telemetry: TelemetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Minimal config for a named service.
    pub fn new(service_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

/// Which errors a retry policy treats as transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPreset {
    /// Network, timeout, 429 and 5xx failures are retried.
    #[default]
    ExternalApi,
    /// Only connection-level failures and timeouts are retried.
    Database,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Named predicate used to decide whether a failure is retried.
    pub policy: RetryPreset,

    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay in milliseconds (unbounded when absent).
    pub max_delay_ms: Option<u64>,

    /// Randomize each delay into the upper half of its computed value.
    pub jitter: bool,
}

/// External-API timing without a delay cap.
impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: None,
            ..Self::external_api()
        }
    }
}

impl RetryConfig {
    /// Timing for calls to third-party HTTP APIs.
    pub fn external_api() -> Self {
        Self {
            policy: RetryPreset::ExternalApi,
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: Some(10_000),
            jitter: true,
        }
    }

    /// Timing for calls to a database-like dependency.
    pub fn database() -> Self {
        Self {
            policy: RetryPreset::Database,
            max_attempts: 5,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: Some(2000),
            jitter: true,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed, in milliseconds.
    pub cooldown_ms: u64,

    /// Failures further apart than this restart the count, in milliseconds.
    pub window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
            window_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Request telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Maximum records kept; the oldest is evicted first.
    pub capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
