use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// A completed HTTP exchange, successful or not.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Why a request did not produce a successful response.
///
/// `status` is `None` when the transport never got an HTTP response back
/// (connection refused, timeout, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub url: String,
    pub status: Option<StatusCode>,
    pub reason: String,
}

impl Failure {
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: Some(response.status),
            reason: response
                .status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        }
    }

    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            url: url.into(),
            status: None,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} returned {}", self.url, status),
            None => write!(f, "{} failed: {}", self.url, self.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(Response::new("u", StatusCode::OK, "").is_success());
        assert!(Response::new("u", StatusCode::NO_CONTENT, "").is_success());
        assert!(!Response::new("u", StatusCode::NOT_MODIFIED, "").is_success());
        assert!(!Response::new("u", StatusCode::INTERNAL_SERVER_ERROR, "").is_success());
    }

    #[test]
    fn test_fetched_at_is_stamped_on_creation() {
        let before = Utc::now();
        let response = Response::new("u", StatusCode::OK, "");
        assert!(response.fetched_at >= before);
        assert!(response.fetched_at <= Utc::now());
    }

    #[test]
    fn test_text_is_lossy() {
        let response = Response::new("u", StatusCode::OK, vec![b'o', b'k', 0xff]);
        assert_eq!(response.text(), "ok\u{fffd}");
    }

    #[test]
    fn test_json_body() {
        let response = Response::new("u", StatusCode::OK, r#"{"count": 3}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_failure_display() {
        let response = Response::new("https://example.com/x", StatusCode::NOT_FOUND, "");
        let failure = Failure::from_response(&response);
        assert_eq!(failure.status, Some(StatusCode::NOT_FOUND));
        assert_eq!(failure.reason, "Not Found");
        assert_eq!(failure.to_string(), "https://example.com/x returned 404 Not Found");

        let failure = Failure::transport("https://example.com/y", "connection refused");
        assert_eq!(failure.status, None);
        assert_eq!(
            failure.to_string(),
            "https://example.com/y failed: connection refused"
        );
    }
}
