//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts >= 1, multiplier >= 1, thresholds > 0)
//! - Check that the base URL and default headers are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration for values serde cannot reject on its own.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::new("service_name", "must not be empty"));
    }

    if let Err(e) = Url::parse(&config.base_url) {
        errors.push(ValidationError::new(
            "base_url",
            format!("invalid URL '{}': {}", config.base_url, e),
        ));
    }

    let retry = &config.retry;
    if retry.max_attempts < 1 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.backoff_multiplier",
            format!("must be a finite number >= 1 (got {})", retry.backoff_multiplier),
        ));
    }
    if let Some(max) = retry.max_delay_ms {
        if max < retry.base_delay_ms {
            errors.push(ValidationError::new(
                "retry.max_delay_ms",
                format!("{} is below base_delay_ms {}", max, retry.base_delay_ms),
            ));
        }
    }

    if config.circuit_breaker.failure_threshold < 1 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }

    if config.telemetry.capacity == 0 {
        errors.push(ValidationError::new("telemetry.capacity", "must be at least 1"));
    }

    if HeaderValue::from_str(&config.client_id).is_err() {
        errors.push(ValidationError::new("client_id", "not a valid header value"));
    }
    for (name, value) in &config.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new("headers", format!("invalid header name '{}'", name)));
        }
        if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(
                "headers",
                format!("invalid value for header '{}'", name),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
