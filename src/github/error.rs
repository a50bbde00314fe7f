//! Hosting provider errors with retry classification.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// Worth another attempt: network failure, 5xx, rate limit, empty-repo race
    #[error("transient hosting error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Retrying the same request cannot help
    #[error("hosting error{}: {message}", status_suffix(.status))]
    Permanent { status: Option<u16>, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl HostError {
    pub fn transient(message: impl Into<String>) -> Self {
        HostError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        HostError::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Transient { .. })
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HostError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a failed request.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HostError::transient(format!("request timeout: {}", error))
        } else if error.is_connect() {
            HostError::transient(format!("connection failed: {}", error))
        } else if error.is_decode() {
            HostError::permanent(format!("unexpected response body: {}", error))
        } else {
            HostError::transient(format!("request failed: {}", error))
        }
    }
}

/// Classify a non-success response.
///
/// - 404 → `NotFound`
/// - 409 (git repository is empty right after creation), 429, 5xx → transient
/// - 403 with `x-ratelimit-remaining: 0` or a secondary rate limit message → transient
/// - everything else → permanent
pub fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str) -> HostError {
    let code = status.as_u16();
    let message = crate::util::truncate_chars(body.trim(), 300, "...");
    let retry_after = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let rate_limited = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
        || body.to_ascii_lowercase().contains("secondary rate limit");

    match code {
        404 => HostError::NotFound(message),
        409 | 429 => HostError::Transient {
            message: format!("HTTP {}: {}", code, message),
            retry_after,
        },
        403 if rate_limited => HostError::Transient {
            message: format!("rate limited: {}", message),
            retry_after,
        },
        500..=599 => HostError::Transient {
            message: format!("HTTP {}: {}", code, message),
            retry_after,
        },
        _ => HostError::Permanent {
            status: Some(code),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn classify(code: u16, headers: HeaderMap, body: &str) -> HostError {
        classify_response(StatusCode::from_u16(code).unwrap(), &headers, body)
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(classify(500, HeaderMap::new(), "").is_transient());
        assert!(classify(502, HeaderMap::new(), "").is_transient());
        assert!(classify(429, HeaderMap::new(), "").is_transient());
        assert!(classify(409, HeaderMap::new(), "Git Repository is empty.").is_transient());
    }

    #[test]
    fn forbidden_depends_on_rate_limit() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(
            classify(403, headers, "API rate limit exceeded"),
            HostError::Transient {
                message: "rate limited: API rate limit exceeded".to_string(),
                retry_after: Some(Duration::from_secs(7)),
            }
        );
        assert!(classify(403, HeaderMap::new(), "You have exceeded a secondary rate limit").is_transient());
        assert_eq!(
            classify(403, HeaderMap::new(), "Resource not accessible"),
            HostError::Permanent {
                status: Some(403),
                message: "Resource not accessible".to_string(),
            }
        );
    }

    #[test]
    fn retry_after_is_exposed_for_throttled_requests() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(classify(429, headers, "").retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(classify(401, HeaderMap::new(), "").retry_after(), None);
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!classify(401, HeaderMap::new(), "Bad credentials").is_transient());
        assert!(!classify(422, HeaderMap::new(), "name is invalid").is_transient());
        assert!(matches!(classify(404, HeaderMap::new(), "Not Found"), HostError::NotFound(_)));
    }

    #[test]
    fn permanent_display_includes_status() {
        let err = HostError::Permanent {
            status: Some(401),
            message: "Bad credentials".to_string(),
        };
        assert_eq!(err.to_string(), "hosting error (HTTP 401): Bad credentials");
        assert_eq!(
            HostError::permanent("boom").to_string(),
            "hosting error: boom"
        );
    }
}
