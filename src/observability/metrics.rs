//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define client metrics (requests, latency, retries, circuit state)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-service metrics
//!
//! # Metrics
//! - `client_requests_total` (counter): requests by service, method, outcome
//! - `client_request_duration_seconds` (histogram): call latency including retries
//! - `client_retries_total` (counter): retry attempts by service
//! - `client_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `client_rate_limit_waits_total` (counter): dispatches that had to wait
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; no-ops until a recorder is installed
//! - Labels for service, method, outcome

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

/// Record a settled call.
pub fn record_request(service: &str, method: &str, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "client_requests_total",
        "service" => service.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!(
        "client_request_duration_seconds",
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_retry(service: &str) {
    ::metrics::counter!("client_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("client_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_rate_limit_wait(service: &str) {
    ::metrics::counter!("client_rate_limit_waits_total", "service" => service.to_string())
        .increment(1);
}
