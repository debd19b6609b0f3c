//! Resilient service client.
//!
//! An HTTP/JSON client for calling upstream services with retries,
//! exponential backoff, per-service circuit breakers, rate limiting
//! and request telemetry.
//!
//! # Architecture Overview
//!
//! ```text
//!     Caller
//!       │
//!       ▼
//!  ┌──────────────────────────────────────────────────────────┐
//!  │ http::client (ResilientClient)                           │
//!  │   circuit_breaker ─▶ retries ─▶ rate_limit ─▶ transport  │
//!  │         ▲               │                        │       │
//!  │         └── settle ◀────┴──── classify ◀─────────┘       │
//!  │                  │                                       │
//!  │                  ▼                                       │
//!  │   observability (telemetry ring, metrics, tracing)       │
//!  └──────────────────────────────────────────────────────────┘
//!       │
//!       ▼
//!   Upstream service
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod resilience;

pub use config::schema::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use http::{ClassifiedError, RequestOptions, ResilientClient, ServiceError};
