//! Pluggable HTTP transport.
//!
//! # Responsibilities
//! - Define the one capability the client needs: send a request, get status/headers/body back
//! - Provide the production implementation on top of `reqwest`
//!
//! # Design Decisions
//! - The client never names a concrete HTTP library; tests plug in scripted transports
//! - Transport errors are already coarse-grained so classification stays trivial

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

/// One outbound request, fully resolved.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// The transport should give up once this instant passes.
    pub deadline: Option<Instant>,
}

impl TransportRequest {
    /// Time left until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// A response of any status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Failures where no usable response came back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused/reset, DNS failure, TLS failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Deadline exceeded before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The request was cancelled before completing.
    #[error("request aborted")]
    Aborted,

    /// The peer answered with something that is not a valid HTTP response.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Capability to put bytes on the wire.
pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// `HttpTransport` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS roots, pool limits).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let remaining = request.remaining();
            let mut builder = self
                .client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            if let Some(remaining) = remaining {
                if remaining.is_zero() {
                    return Err(TransportError::Timeout);
                }
                builder = builder.timeout(remaining);
            }

            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(map_reqwest_error)?;

            Ok(TransportResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_body() || error.is_decode() {
        TransportError::Malformed(error.to_string())
    } else {
        TransportError::Connect(error.to_string())
    }
}
