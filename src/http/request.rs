//! Request preparation.
//!
//! # Responsibilities
//! - Per-call options (headers, query, deadline)
//! - Resolve a request path against the client's base URL
//! - Merge client default headers, identity headers and per-call headers
//!
//! # Design Decisions
//! - Per-call headers win over client defaults
//! - Request ID added to every attempt of a call, so upstream logs correlate retries

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, CONTENT_TYPE};
use url::Url;

/// Header carrying the per-call request ID.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Header carrying the configured client identifier.
pub const CLIENT_ID_HEADER: HeaderName = HeaderName::from_static("x-client-id");

/// Options for a single call, merged over the client defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    /// Deadline for the whole call, including retries and waits.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Join `path` onto `base`, treating `base` as a directory.
pub fn resolve_url(
    base: &Url,
    path: &str,
    query: &[(String, String)],
) -> Result<Url, url::ParseError> {
    let mut url = if path.starts_with("http://") || path.starts_with("https://") {
        Url::parse(path)?
    } else {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(path.trim_start_matches('/'))?
    };

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

/// Assemble the headers for one call.
pub fn merge_headers(
    defaults: &HeaderMap,
    client_id: &HeaderValue,
    request_id: &str,
    json_body: bool,
    per_call: &HeaderMap,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = defaults.clone();
    headers.insert(CLIENT_ID_HEADER, client_id.clone());
    headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(request_id)?);
    if json_body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    for (name, value) in per_call {
        headers.insert(name.clone(), value.clone());
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_paths() {
        let base = Url::parse("https://api.example.com/functions/v1").unwrap();
        assert_eq!(
            resolve_url(&base, "api-papers", &[]).unwrap().as_str(),
            "https://api.example.com/functions/v1/api-papers"
        );
        assert_eq!(
            resolve_url(&base, "/api-reviewers", &[]).unwrap().as_str(),
            "https://api.example.com/functions/v1/api-reviewers"
        );
    }

    #[test]
    fn test_resolve_absolute_url_and_query() {
        let base = Url::parse("https://api.example.com/").unwrap();
        let url = resolve_url(
            &base,
            "https://other.example.com/x",
            &[("page".into(), "2".into()), ("q".into(), "deep learning".into())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/x?page=2&q=deep+learning");
    }

    #[test]
    fn test_per_call_headers_override_defaults() {
        let mut defaults = HeaderMap::new();
        defaults.insert("apikey", HeaderValue::from_static("default"));
        defaults.insert("accept", HeaderValue::from_static("application/json"));
        let per_call = RequestOptions::new()
            .header(HeaderName::from_static("apikey"), HeaderValue::from_static("override"))
            .headers;

        let headers = merge_headers(
            &defaults,
            &HeaderValue::from_static("scholar-finder"),
            "req-1",
            true,
            &per_call,
        )
        .unwrap();

        assert_eq!(headers["apikey"], "override");
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers[CLIENT_ID_HEADER], "scholar-finder");
        assert_eq!(headers[REQUEST_ID_HEADER], "req-1");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_no_content_type_without_body() {
        let headers = merge_headers(
            &HeaderMap::new(),
            &HeaderValue::from_static("c"),
            "req-2",
            false,
            &HeaderMap::new(),
        )
        .unwrap();
        assert!(headers.get(CONTENT_TYPE).is_none());
    }
}
