//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! Caller (get/post/put/delete)
//!     → client.rs (request ID, telemetry, circuit check)
//!     → request.rs (resolve URL, merge headers)
//!     → [resilience: retries, rate limit, deadlines]
//!     → transport.rs (one HTTP exchange)
//!     → classify.rs (status / transport error → ClassifiedError)
//!     → client.rs (decode JSON or surface ClientError)
//! ```

pub mod classify;
pub mod client;
pub mod request;
pub mod transport;

pub use classify::{ClassifiedError, ServiceError};
pub use client::{ClientBuilder, ResilientClient};
pub use request::{RequestOptions, CLIENT_ID_HEADER, REQUEST_ID_HEADER};
pub use transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse,
};
