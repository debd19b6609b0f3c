//! Request spans.
//!
//! # Responsibilities
//! - Create one span per client call carrying the correlation ID
//! - Make every log line emitted inside the call (retries, circuit
//!   transitions, rate-limit waits) attributable to that call
//!
//! # Design Decisions
//! - The span's `request_id` is the same ID sent upstream as `x-request-id`
//!   and stored in telemetry

use tracing::Span;

/// Span wrapping one client call.
pub fn request_span(service: &str, request_id: &str, method: &str, url: &str) -> Span {
    tracing::info_span!(
        "upstream_request",
        service = %service,
        request_id = %request_id,
        method = %method,
        url = %url,
    )
}
