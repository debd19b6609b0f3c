//! Errors surfaced by the resilient client.

use thiserror::Error;

use crate::http::classify::{ClassifiedError, ServiceError};
use crate::resilience::circuit_breaker::CircuitOpenError;
use crate::resilience::retries::RetryError;

/// Terminal failure of a client call.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The service's circuit is open; nothing was sent.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Attempts ran out, or the last failure was not retryable.
    #[error(transparent)]
    RetryExhausted(#[from] RetryError<ServiceError>),

    /// The caller's deadline for the whole call passed.
    #[error("{error}")]
    DeadlineExceeded { error: ServiceError, attempts: u32 },

    /// The request could not be built (bad path, header or body).
    #[error("Invalid request to {service}: {reason}")]
    InvalidRequest { service: String, reason: String },
}

impl ClientError {
    /// The classified failure behind this error, if one was produced.
    pub fn classification(&self) -> Option<&ClassifiedError> {
        match self {
            ClientError::RetryExhausted(e) => Some(&e.last_error.kind),
            ClientError::DeadlineExceeded { error, .. } => Some(&error.kind),
            ClientError::CircuitOpen(_) | ClientError::InvalidRequest { .. } => None,
        }
    }

    /// Attempts made before the call failed.
    pub fn attempts(&self) -> u32 {
        match self {
            ClientError::RetryExhausted(e) => e.attempts,
            ClientError::DeadlineExceeded { attempts, .. } => *attempts,
            ClientError::CircuitOpen(_) | ClientError::InvalidRequest { .. } => 0,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen(_))
    }
}

/// Result type for client calls.
pub type ClientResult<T> = Result<T, ClientError>;
