//! Failure classification.
//!
//! # Responsibilities
//! - Turn a transport error or a non-2xx response into exactly one `ClassifiedError`
//! - Produce the service-qualified message callers see
//!
//! # Design Decisions
//! - Classification happens once per failed attempt; retry predicates read the tag
//! - 4xx other than 429 are the caller's fault and are never transient
//! - A 429 carries the upstream's Retry-After hint (5s when absent)

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::http::transport::TransportError;
use crate::resilience::retries::Retryable;

/// Fallback when a 429 response carries no usable Retry-After header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Normalized failure category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedError {
    /// No response received: reset, DNS, refused, aborted.
    Network,
    /// HTTP 429.
    RateLimited { retry_after: Duration },
    /// HTTP 5xx.
    ServerError { status: u16 },
    /// HTTP 4xx other than 429.
    ClientError { status: u16 },
    /// Deadline exceeded before a response arrived.
    Timeout,
    /// Malformed or unexpected response.
    Unknown,
}

impl ClassifiedError {
    /// Classify a failure that produced no response.
    pub fn from_transport_error(error: &TransportError) -> Self {
        match error {
            TransportError::Connect(_) | TransportError::Aborted => ClassifiedError::Network,
            TransportError::Timeout => ClassifiedError::Timeout,
            TransportError::Malformed(_) => ClassifiedError::Unknown,
        }
    }

    /// Classify a response by status. Returns `None` for 2xx.
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Option<Self> {
        if status.is_success() {
            return None;
        }

        let code = status.as_u16();
        Some(match code {
            429 => ClassifiedError::RateLimited {
                retry_after: parse_retry_after(headers),
            },
            500..=599 => ClassifiedError::ServerError { status: code },
            400..=499 => ClassifiedError::ClientError { status: code },
            _ => ClassifiedError::Unknown,
        })
    }

    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClassifiedError::Network
                | ClassifiedError::Timeout
                | ClassifiedError::RateLimited { .. }
                | ClassifiedError::ServerError { .. }
        )
    }

    /// Whether the failure happened below HTTP (nothing came back).
    pub fn is_connection_level(&self) -> bool {
        matches!(self, ClassifiedError::Network | ClassifiedError::Timeout)
    }

    /// HTTP status carried by the classification, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClassifiedError::RateLimited { .. } => Some(429),
            ClassifiedError::ServerError { status } | ClassifiedError::ClientError { status } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Short label for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedError::Network => "network",
            ClassifiedError::RateLimited { .. } => "rate_limited",
            ClassifiedError::ServerError { .. } => "server_error",
            ClassifiedError::ClientError { .. } => "client_error",
            ClassifiedError::Timeout => "timeout",
            ClassifiedError::Unknown => "unknown",
        }
    }

    /// User-facing message for a failure talking to `service`.
    pub fn message(&self, service: &str) -> String {
        match self {
            ClassifiedError::Network => format!("Network error when calling {}", service),
            ClassifiedError::RateLimited { .. } => format!("Rate limit exceeded for {}", service),
            ClassifiedError::ServerError { .. } => format!("Server error from {}", service),
            ClassifiedError::ClientError { .. } => format!("Client error from {}", service),
            ClassifiedError::Timeout => format!("Request to {} timed out", service),
            ClassifiedError::Unknown => format!("Unexpected response from {}", service),
        }
    }
}

impl Retryable for ClassifiedError {
    fn classification(&self) -> Option<&ClassifiedError> {
        Some(self)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// A classified failure attributed to one upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub service: String,
    pub kind: ClassifiedError,
    /// Low-level detail (transport message, decode error) kept for logs.
    pub detail: Option<String>,
}

impl ServiceError {
    pub fn new(service: impl Into<String>, kind: ClassifiedError) -> Self {
        Self {
            service: service.into(),
            kind,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn from_transport(service: impl Into<String>, error: &TransportError) -> Self {
        Self::new(service, ClassifiedError::from_transport_error(error))
            .with_detail(error.to_string())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind.message(&self.service))
    }
}

impl std::error::Error for ServiceError {}

impl Retryable for ServiceError {
    fn classification(&self) -> Option<&ClassifiedError> {
        Some(&self.kind)
    }
}
