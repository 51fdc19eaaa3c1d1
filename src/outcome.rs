//! Classification of a single HTTP attempt.

use crate::decode::DecodeError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

pub const RATE_LIMIT_COUNT: &str = "X-Rate-Limit-Count";

/// What came back from the server for one attempt, before classification
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: StatusCode,
    pub retry_after: Option<Duration>,
    pub rate_limit_count: Option<String>,
    pub body: String,
}

impl Exchange {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: String) -> Self {
        Self {
            status,
            retry_after: parse_retry_after(header_str(headers, RETRY_AFTER.as_str())),
            rate_limit_count: header_str(headers, RATE_LIMIT_COUNT).map(str::to_string),
            body,
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Why an attempt will be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited { rate_limit_count: Option<String> },
    Status(StatusCode),
    Transport(String),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RateLimited { rate_limit_count: Some(count) } => {
                write!(f, "rate limited (count {})", count)
            }
            RetryReason::RateLimited { rate_limit_count: None } => write!(f, "rate limited"),
            RetryReason::Status(status) => write!(f, "bad status: {}", status),
            RetryReason::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Success(T),
    RetryableFailure {
        reason: RetryReason,
        retry_after: Option<Duration>,
    },
    TerminalFailure(String),
    NotFound,
}

impl<T> CallOutcome<T> {
    /// Classify a completed exchange. The body is only decoded for 2xx.
    pub fn classify<D>(exchange: Exchange, decode: D) -> Self
    where
        D: FnOnce(&str) -> Result<T, DecodeError>,
    {
        let status = exchange.status;

        if status.is_success() {
            return match decode(&exchange.body) {
                Ok(value) => CallOutcome::Success(value),
                Err(err) => CallOutcome::TerminalFailure(err.to_string()),
            };
        }

        match status {
            StatusCode::NOT_FOUND => CallOutcome::NotFound,
            StatusCode::TOO_MANY_REQUESTS => CallOutcome::RetryableFailure {
                reason: RetryReason::RateLimited {
                    rate_limit_count: exchange.rate_limit_count,
                },
                retry_after: exchange.retry_after,
            },
            _ => CallOutcome::RetryableFailure {
                reason: RetryReason::Status(status),
                retry_after: None,
            },
        }
    }

    pub fn transport(err: impl fmt::Display) -> Self {
        CallOutcome::RetryableFailure {
            reason: RetryReason::Transport(err.to_string()),
            retry_after: None,
        }
    }
}

/// Parse a `Retry-After` value given in seconds
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use reqwest::header::HeaderValue;
    use serde_json::{json, Value};

    fn exchange(status: u16, body: &str) -> Exchange {
        Exchange::new(
            StatusCode::from_u16(status).unwrap(),
            &HeaderMap::new(),
            body.to_string(),
        )
    }

    #[test]
    fn test_success_decodes_body() {
        let outcome = CallOutcome::<Value>::classify(exchange(200, r#"{"id":7}"#), decode::json_tree);
        assert_eq!(outcome, CallOutcome::Success(json!({"id": 7})));
    }

    #[test]
    fn test_undecodable_success_is_terminal() {
        let outcome = CallOutcome::<Value>::classify(exchange(200, "{truncated"), decode::json_tree);
        assert!(matches!(outcome, CallOutcome::TerminalFailure(_)));
    }

    #[test]
    fn test_not_found_skips_decoding() {
        let outcome = CallOutcome::<Value>::classify(exchange(404, "not json"), decode::json_tree);
        assert_eq!(outcome, CallOutcome::NotFound);
    }

    #[test]
    fn test_rate_limited_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        headers.insert(RATE_LIMIT_COUNT, HeaderValue::from_static("10:1,500:10"));
        let exchange = Exchange::new(StatusCode::TOO_MANY_REQUESTS, &headers, String::new());

        let outcome = CallOutcome::<Value>::classify(exchange, decode::json_tree);
        assert_eq!(
            outcome,
            CallOutcome::RetryableFailure {
                reason: RetryReason::RateLimited {
                    rate_limit_count: Some("10:1,500:10".to_string())
                },
                retry_after: Some(Duration::from_secs(2)),
            }
        );
    }

    #[test]
    fn test_rate_limited_without_retry_after() {
        let outcome = CallOutcome::<Value>::classify(exchange(429, ""), decode::json_tree);
        assert!(matches!(
            outcome,
            CallOutcome::RetryableFailure { retry_after: None, .. }
        ));
    }

    #[test]
    fn test_other_errors_are_retryable() {
        for status in [400, 401, 403, 500, 502, 503, 504] {
            let outcome = CallOutcome::<Value>::classify(exchange(status, ""), decode::json_tree);
            assert!(
                matches!(outcome, CallOutcome::RetryableFailure { retry_after: None, .. }),
                "status {} should be retried",
                status
            );
        }
    }

    #[test]
    fn test_transport_failure() {
        let outcome = CallOutcome::<Value>::transport("connection reset by peer");
        assert_eq!(
            outcome,
            CallOutcome::RetryableFailure {
                reason: RetryReason::Transport("connection reset by peer".to_string()),
                retry_after: None,
            }
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("1")), Some(Duration::from_secs(1)));
        assert_eq!(parse_retry_after(Some(" 30 ")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_retry_reason_display() {
        assert_eq!(
            RetryReason::Status(StatusCode::SERVICE_UNAVAILABLE).to_string(),
            "bad status: 503 Service Unavailable"
        );
        assert_eq!(
            RetryReason::RateLimited { rate_limit_count: None }.to_string(),
            "rate limited"
        );
    }
}
