//! Request telemetry.
//!
//! # Responsibilities
//! - Describe each settled client call (id, target, timing, attempts, outcome)
//! - Keep the most recent records in a bounded ring buffer
//! - Serve snapshots and aggregates to operational tooling
//!
//! # Design Decisions
//! - Records are appended when a call settles, so buffer order is completion order
//! - `recent` returns newest first
//! - Callers only ever receive clones; the recorder owns the buffer

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

/// How a call settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    Failure,
    CircuitRejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Failure => "failure",
            RequestStatus::CircuitRejected => "circuit_rejected",
        }
    }
}

/// One settled call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMetric {
    pub request_id: String,
    pub service: String,
    pub url: String,
    pub method: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration_ms: u64,
    pub status: RequestStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// A call that has started but not settled.
#[derive(Debug)]
pub struct PendingRequest {
    request_id: String,
    service: String,
    url: String,
    method: String,
    start_time: SystemTime,
    started: Instant,
}

impl PendingRequest {
    /// Start tracking a call under a fresh request ID.
    pub fn begin(service: &str, method: &str, url: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            service: service.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            start_time: SystemTime::now(),
            started: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Settle the call.
    pub fn finish(
        self,
        status: RequestStatus,
        attempts: u32,
        error: Option<String>,
    ) -> RequestMetric {
        let duration = self.started.elapsed();
        RequestMetric {
            request_id: self.request_id,
            service: self.service,
            url: self.url,
            method: self.method,
            start_time: self.start_time,
            end_time: self.start_time + duration,
            duration_ms: duration.as_millis() as u64,
            status,
            attempts,
            error,
        }
    }
}

/// Aggregate over the records currently buffered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub circuit_rejected: usize,
    pub mean_duration_ms: f64,
    pub mean_attempts: f64,
}

/// Bounded ring buffer of recent request metrics.
#[derive(Debug)]
pub struct TelemetryRecorder {
    capacity: usize,
    buffer: Mutex<VecDeque<RequestMetric>>,
}

impl TelemetryRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RequestMetric>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest when full.
    pub fn record(&self, metric: RequestMetric) {
        let mut buffer = self.lock();
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(metric);
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RequestMetric> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn summary(&self) -> TelemetrySummary {
        let buffer = self.lock();
        let mut summary = TelemetrySummary {
            total: buffer.len(),
            ..TelemetrySummary::default()
        };
        if buffer.is_empty() {
            return summary;
        }

        let mut duration_total = 0u64;
        let mut attempts_total = 0u64;
        for metric in buffer.iter() {
            match metric.status {
                RequestStatus::Success => summary.successes += 1,
                RequestStatus::Failure => summary.failures += 1,
                RequestStatus::CircuitRejected => summary.circuit_rejected += 1,
            }
            duration_total += metric.duration_ms;
            attempts_total += u64::from(metric.attempts);
        }
        summary.mean_duration_ms = duration_total as f64 / buffer.len() as f64;
        summary.mean_attempts = attempts_total as f64 / buffer.len() as f64;
        summary
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(n: usize, status: RequestStatus, attempts: u32) -> RequestMetric {
        PendingRequest::begin("papers", "GET", &format!("http://upstream/{}", n))
            .finish(status, attempts, None)
    }

    #[test]
    fn test_recent_is_newest_first() {
        let recorder = TelemetryRecorder::new(10);
        for n in 0..3 {
            recorder.record(metric(n, RequestStatus::Success, 1));
        }

        let urls: Vec<_> = recorder.recent(10).into_iter().map(|m| m.url).collect();
        assert_eq!(urls, vec!["http://upstream/2", "http://upstream/1", "http://upstream/0"]);
        assert_eq!(recorder.recent(1)[0].url, "http://upstream/2");
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let recorder = TelemetryRecorder::new(3);
        for n in 0..5 {
            recorder.record(metric(n, RequestStatus::Success, 1));
        }

        assert_eq!(recorder.len(), 3);
        let urls: Vec<_> = recorder.recent(10).into_iter().map(|m| m.url).collect();
        assert_eq!(urls, vec!["http://upstream/4", "http://upstream/3", "http://upstream/2"]);
    }

    #[test]
    fn test_clear() {
        let recorder = TelemetryRecorder::new(3);
        recorder.record(metric(0, RequestStatus::Failure, 3));
        recorder.clear();
        assert!(recorder.is_empty());
        assert!(recorder.recent(5).is_empty());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = PendingRequest::begin("papers", "GET", "http://upstream/");
        let b = PendingRequest::begin("papers", "GET", "http://upstream/");
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_finish_sets_end_time() {
        let metric = PendingRequest::begin("papers", "POST", "http://upstream/")
            .finish(RequestStatus::Failure, 2, Some("boom".into()));
        assert!(metric.end_time >= metric.start_time);
        assert_eq!(metric.attempts, 2);
        assert_eq!(metric.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_summary() {
        let recorder = TelemetryRecorder::new(10);
        recorder.record(metric(0, RequestStatus::Success, 1));
        recorder.record(metric(1, RequestStatus::Failure, 3));
        recorder.record(metric(2, RequestStatus::CircuitRejected, 0));
        recorder.record(metric(3, RequestStatus::Success, 2));

        let summary = recorder.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.circuit_rejected, 1);
        assert_eq!(summary.mean_attempts, 1.5);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(metric(0, RequestStatus::CircuitRejected, 0)).unwrap();
        assert_eq!(json["status"], "circuit_rejected");
        assert_eq!(json["service"], "papers");
    }
}
