//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every client call produces:
//!     → telemetry.rs (one RequestMetric in the bounded ring buffer)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (span with the request ID)
//!     → logging.rs (structured log events, via the installed subscriber)
//!
//! Consumers:
//!     → Operational tooling reading recent telemetry
//!     → Metrics endpoint (Prometheus scrape)
//!     → Log aggregation (stdout)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Telemetry append is the only mutation; eviction happens inside append
//! - Metrics are cheap and no-ops without an installed recorder

pub mod logging;
pub mod metrics;
pub mod telemetry;
pub mod tracing;

pub use telemetry::{
    PendingRequest, RequestMetric, RequestStatus, TelemetryRecorder, TelemetrySummary,
};
