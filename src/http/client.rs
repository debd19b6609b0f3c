//! Resilient service client.
//!
//! # Responsibilities
//! - Expose `get/post/put/delete` against one logical upstream service
//! - Gate calls on the service's circuit breaker
//! - Run each call under the retry executor, rate limiting every attempt
//! - Classify failures and surface service-qualified errors
//! - Record one telemetry entry per settled call
//!
//! # Design Decisions
//! - The client owns no global state; breakers, limiter and telemetry are
//!   injected (or created per client) and may be shared between clients
//! - A circuit-open rejection touches neither the limiter nor the transport
//! - The breaker is updated once per call, not once per attempt

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;

use crate::config::validation::{validate_config, ValidationError};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, ClientResult};
use crate::http::classify::{ClassifiedError, ServiceError};
use crate::http::request::{merge_headers, resolve_url, RequestOptions};
use crate::http::transport::{HttpTransport, TransportRequest};
use crate::observability::metrics;
use crate::observability::telemetry::{
    PendingRequest, RequestMetric, RequestStatus, TelemetryRecorder, TelemetrySummary,
};
use crate::observability::tracing::request_span;
use crate::resilience::circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerRegistry};
use crate::resilience::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::resilience::rate_limit::RateLimiter;
use crate::resilience::retries::{RetryExecutor, RetryPredicate};
use crate::resilience::timeouts::{earliest, with_deadline, DeadlineExceeded};

/// Client for one upstream service with retries, circuit breaking,
/// rate limiting and request telemetry.
pub struct ResilientClient {
    config: ClientConfig,
    base_url: Url,
    default_headers: HeaderMap,
    client_id: HeaderValue,
    transport: Arc<dyn HttpTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limiter: Arc<RateLimiter>,
    telemetry: Arc<TelemetryRecorder>,
    retry: RetryExecutor<ServiceError>,
}

/// Builder for `ResilientClient`, used to inject shared state and test doubles.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    telemetry: Option<Arc<TelemetryRecorder>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    retry_predicate: Option<RetryPredicate<ServiceError>>,
    seed: Option<u64>,
}

impl ClientBuilder {
    /// Share circuit breakers with other clients.
    pub fn breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Share a rate limiter with other clients.
    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<TelemetryRecorder>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sleep primitive for backoff and rate-limit waits.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Override the predicate chosen by `config.retry.policy`.
    pub fn retry_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ServiceError) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Seed the backoff jitter.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<ResilientClient, ConfigError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::new("base_url", e.to_string())])
        })?;
        let client_id = HeaderValue::from_str(&config.client_id).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::new("client_id", e.to_string())])
        })?;
        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                default_headers.insert(name, value);
            }
        }

        let service = config.service_name.clone();
        let breakers = self.breakers.unwrap_or_else(|| {
            Arc::new(CircuitBreakerRegistry::with_clock(
                config.circuit_breaker.clone(),
                self.clock.clone(),
            ))
        });
        let rate_limiter = self.rate_limiter.unwrap_or_else(|| {
            Arc::new(RateLimiter::with_time(
                config.rate_limit_delay(),
                self.clock.clone(),
                self.sleeper.clone(),
            ))
        });
        rate_limiter.set_interval(&service, config.rate_limit_delay());
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TelemetryRecorder::new(config.telemetry.capacity)));

        let mut retry = RetryExecutor::new(config.retry.clone())
            .sleeper(self.sleeper)
            .clock(self.clock)
            .named(service.clone());
        if let Some(predicate) = self.retry_predicate {
            retry = retry.predicate(predicate);
        }
        if let Some(seed) = self.seed {
            retry = retry.seed(seed);
        }

        tracing::debug!(
            service = %service,
            base_url = %base_url,
            max_attempts = config.retry.max_attempts,
            "Resilient client built"
        );

        Ok(ResilientClient {
            config,
            base_url,
            default_headers,
            client_id,
            transport: self.transport,
            breakers,
            rate_limiter,
            telemetry,
            retry,
        })
    }
}

impl ResilientClient {
    /// Client with its own breaker, limiter and telemetry.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        Self::builder(config, transport).build()
    }

    pub fn builder(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> ClientBuilder {
        ClientBuilder {
            config,
            transport,
            breakers: None,
            rate_limiter: None,
            telemetry: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            retry_predicate: None,
            seed: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        opts: Option<RequestOptions>,
    ) -> ClientResult<T> {
        self.call(Method::GET, path, None, opts.unwrap_or_default()).await
    }

    pub async fn post<T, B>(
        &self,
        path: &str,
        body: &B,
        opts: Option<RequestOptions>,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = self.encode(body)?;
        self.call(Method::POST, path, Some(body), opts.unwrap_or_default()).await
    }

    pub async fn put<T, B>(
        &self,
        path: &str,
        body: &B,
        opts: Option<RequestOptions>,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = self.encode(body)?;
        self.call(Method::PUT, path, Some(body), opts.unwrap_or_default()).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        opts: Option<RequestOptions>,
    ) -> ClientResult<T> {
        self.call(Method::DELETE, path, None, opts.unwrap_or_default()).await
    }

    fn encode<B: Serialize + ?Sized>(&self, body: &B) -> ClientResult<Vec<u8>> {
        serde_json::to_vec(body)
            .map_err(|e| self.invalid(format!("body is not serializable: {}", e)))
    }

    fn invalid(&self, reason: String) -> ClientError {
        ClientError::InvalidRequest {
            service: self.config.service_name.clone(),
            reason,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        opts: RequestOptions,
    ) -> ClientResult<T> {
        let url = resolve_url(&self.base_url, path, &opts.query)
            .map_err(|e| self.invalid(format!("bad path '{}': {}", path, e)))?;
        let pending = PendingRequest::begin(self.service_name(), method.as_str(), url.as_str());
        let span = request_span(
            self.service_name(),
            pending.request_id(),
            method.as_str(),
            url.as_str(),
        );

        self.run(method, url, body, opts, pending).instrument(span).await
    }

    async fn run<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        opts: RequestOptions,
        pending: PendingRequest,
    ) -> ClientResult<T> {
        let service = self.service_name();

        let headers = match merge_headers(
            &self.default_headers,
            &self.client_id,
            pending.request_id(),
            body.is_some(),
            &opts.headers,
        ) {
            Ok(headers) => headers,
            Err(e) => {
                let error = self.invalid(format!("bad header: {}", e));
                self.settle(pending, &method, RequestStatus::Failure, 0, Some(error.to_string()));
                return Err(error);
            }
        };

        let breaker = self.breakers.get(service);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                tracing::warn!("Circuit open, rejecting call");
                let error = ClientError::from(open);
                self.settle(
                    pending,
                    &method,
                    RequestStatus::CircuitRejected,
                    0,
                    Some(error.to_string()),
                );
                return Err(error);
            }
        };

        let call_deadline = opts.timeout.map(|timeout| Instant::now() + timeout);
        let attempts = AtomicU32::new(0);
        let execution = self.retry.execute(|| {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.attempt::<T>(&method, &url, &headers, body.as_deref(), call_deadline)
        });

        match with_deadline(call_deadline, execution).await {
            Ok(Ok(result)) => {
                permit.success();
                self.settle(pending, &method, RequestStatus::Success, result.attempts, None);
                Ok(result.value)
            }
            Ok(Err(exhausted)) => {
                permit.failure();
                let error = ClientError::from(exhausted);
                tracing::warn!(attempts = error.attempts(), error = %error, "Call failed");
                self.settle(
                    pending,
                    &method,
                    RequestStatus::Failure,
                    error.attempts(),
                    Some(error.to_string()),
                );
                Err(error)
            }
            Err(DeadlineExceeded) => {
                permit.failure();
                let error = ClientError::DeadlineExceeded {
                    error: ServiceError::new(service, ClassifiedError::Timeout)
                        .with_detail("call deadline exceeded"),
                    attempts: attempts.load(Ordering::Relaxed),
                };
                tracing::warn!(attempts = error.attempts(), "Call deadline exceeded");
                self.settle(
                    pending,
                    &method,
                    RequestStatus::Failure,
                    error.attempts(),
                    Some(error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// One rate-limited dispatch, classified.
    async fn attempt<T: DeserializeOwned>(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&[u8]>,
        call_deadline: Option<Instant>,
    ) -> Result<T, ServiceError> {
        let service = self.service_name();
        self.rate_limiter.acquire(service).await;

        let attempt_deadline =
            (self.config.timeout_ms > 0).then(|| Instant::now() + self.config.timeout());
        let deadline = earliest(attempt_deadline, call_deadline);
        let request = TransportRequest {
            method: method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body: body.map(<[u8]>::to_vec),
            deadline,
        };

        let response = match with_deadline(deadline, self.transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ServiceError::from_transport(service, &e)),
            Err(DeadlineExceeded) => {
                return Err(ServiceError::new(service, ClassifiedError::Timeout)
                    .with_detail("transport deadline exceeded"));
            }
        };

        if let Some(kind) = ClassifiedError::from_response(response.status, &response.headers) {
            return Err(
                ServiceError::new(service, kind).with_detail(format!("HTTP {}", response.status))
            );
        }

        decode_body(&response.body).map_err(|e| {
            ServiceError::new(service, ClassifiedError::Unknown)
                .with_detail(format!("undecodable response body: {}", e))
        })
    }

    fn settle(
        &self,
        pending: PendingRequest,
        method: &Method,
        status: RequestStatus,
        attempts: u32,
        error: Option<String>,
    ) {
        metrics::record_request(
            self.service_name(),
            method.as_str(),
            status.as_str(),
            pending.elapsed(),
        );
        self.telemetry.record(pending.finish(status, attempts, error));
    }

    // --- Operational controls ---

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        self.breakers.get(self.service_name())
    }

    pub fn breaker_stats(&self) -> BreakerStats {
        self.circuit_breaker().get_stats()
    }

    pub fn force_open(&self) {
        self.circuit_breaker().force_open();
    }

    pub fn force_closed(&self) {
        self.circuit_breaker().force_closed();
    }

    pub fn reset_circuit(&self) {
        self.circuit_breaker().reset();
    }

    /// Up to `limit` telemetry records, newest first.
    pub fn recent_metrics(&self, limit: usize) -> Vec<RequestMetric> {
        self.telemetry.recent(limit)
    }

    pub fn clear_metrics(&self) {
        self.telemetry.clear();
    }

    pub fn telemetry_summary(&self) -> TelemetrySummary {
        self.telemetry.summary()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("service", &self.config.service_name)
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Decode a 2xx body; an empty body decodes as JSON `null`.
fn decode_body<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_slice(b"null")
    } else {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::{TransportError, TransportResponse};
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::clock::InstantSleeper;
    use futures_util::future::BoxFuture;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    /// Replays canned outcomes in order; the last one repeats.
    struct CannedTransport {
        outcomes: Mutex<Vec<Result<TransportResponse, TransportError>>>,
        sent: Mutex<Vec<TransportRequest>>,
    }

    impl CannedTransport {
        fn new(outcomes: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<TransportRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl HttpTransport for CannedTransport {
        fn send(
            &self,
            request: TransportRequest,
        ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
            self.sent.lock().unwrap().push(request);
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 { outcomes.remove(0) } else { outcomes[0].clone() };
            Box::pin(async move { outcome })
        }
    }

    fn ok(body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse::new(StatusCode::OK, body))
    }

    fn status(code: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse::new(StatusCode::from_u16(code).unwrap(), ""))
    }

    fn client(transport: Arc<CannedTransport>) -> ResilientClient {
        let mut config = ClientConfig::new("papers", "http://upstream.test/api");
        config.client_id = "unit-test".into();
        config.headers.insert("apikey".into(), "anon".into());
        config.retry.base_delay_ms = 10;
        config.retry.jitter = false;
        ResilientClient::builder(config, transport)
            .sleeper(Arc::new(InstantSleeper))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_decodes_json() {
        let transport = CannedTransport::new(vec![ok(r#"{"title":"Deep Learning"}"#)]);
        let client = client(transport.clone());

        let body: serde_json::Value = client.get("papers", None).await.unwrap();
        assert_eq!(body["title"], "Deep Learning");

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::GET);
        assert_eq!(sent[0].url.as_str(), "http://upstream.test/api/papers");
        assert_eq!(sent[0].headers["apikey"], "anon");
        assert_eq!(sent[0].headers["x-client-id"], "unit-test");
        assert!(sent[0].deadline.is_some());
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let transport = CannedTransport::new(vec![ok(r#"{"id":7}"#)]);
        let client = client(transport.clone());

        let created: serde_json::Value = client
            .post("papers", &serde_json::json!({"title": "NLP"}), None)
            .await
            .unwrap();
        assert_eq!(created["id"], 7);

        let sent = transport.sent();
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].headers["content-type"], "application/json");
        assert_eq!(sent[0].body.as_deref(), Some(br#"{"title":"NLP"}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_unit() {
        let transport = CannedTransport::new(vec![status(204)]);
        let client = client(transport);
        let () = client.delete("papers/7", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_share_request_id() {
        let transport = CannedTransport::new(vec![status(503), ok("{}")]);
        let client = client(transport.clone());

        let _: serde_json::Value = client
            .put("papers/7", &serde_json::json!({}), None)
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].headers["x-request-id"], sent[1].headers["x-request-id"]);
        let metric = &client.recent_metrics(1)[0];
        assert_eq!(metric.attempts, 2);
        assert_eq!(sent[0].headers["x-request-id"], metric.request_id.as_str());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_unknown_and_not_retried() {
        let transport = CannedTransport::new(vec![ok("<html>")]);
        let client = client(transport.clone());

        let err = client.get::<serde_json::Value>("papers", None).await.unwrap_err();
        assert_eq!(err.classification(), Some(&ClassifiedError::Unknown));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(
            err.to_string(),
            "Operation failed after 3 attempts. Last error: Unexpected response from papers"
        );
    }

    #[tokio::test]
    async fn test_exhaustion_counts_one_breaker_failure() {
        let transport = CannedTransport::new(vec![Err(TransportError::Connect("reset".into()))]);
        let client = client(transport.clone());

        let err = client.get::<serde_json::Value>("papers", None).await.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(client.breaker_stats().failure_count, 1);
        assert_eq!(client.breaker_stats().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let transport = CannedTransport::new(vec![ok("{}")]);
        let config = ClientConfig::new("", "::not a url::");
        let err = ResilientClient::new(config, transport).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 2));
    }

    #[test]
    fn test_decode_body() {
        let value: Option<u32> = decode_body(b"").unwrap();
        assert_eq!(value, None);
        let value: u32 = decode_body(b" 42 ").unwrap();
        assert_eq!(value, 42);
        assert!(decode_body::<u32>(b"nope").is_err());
    }
}
