//! Failures talking to the completion endpoint.
//!
//! The generator retries on [`LlmError::is_transient`]; a bad key or a
//! rejected prompt ends generation on the first attempt.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    /// Parsed `Retry-After`, seconds form only
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn of(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Non-2xx answer from the endpoint.
    ///
    /// 429 is throttling, 408 and 5xx are the provider's problem, any other
    /// 4xx means the request itself is wrong.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let kind = match status {
            429 => LlmErrorKind::RateLimited,
            408 => LlmErrorKind::Timeout,
            400..=499 => LlmErrorKind::ClientError,
            _ => LlmErrorKind::ServerError,
        };
        Self {
            status_code: Some(status),
            retry_after,
            ..Self::of(kind, body)
        }
    }

    /// The request never got an HTTP answer.
    pub fn network(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::of(LlmErrorKind::Timeout, format!("request timed out: {}", error))
        } else {
            Self::of(LlmErrorKind::NetworkError, error.to_string())
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::of(LlmErrorKind::Timeout, format!("no response within {:?}", after))
    }

    /// Answer arrived but carried no usable completion.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::of(LlmErrorKind::ParseError, message)
    }

    pub fn not_configured() -> Self {
        Self::of(LlmErrorKind::NotConfigured, "LLM_API_KEY is not set")
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    RateLimited,
    ServerError,
    /// Bad key, unknown model, prompt rejected
    ClientError,
    NetworkError,
    Timeout,
    /// Malformed body or an empty completion; a fresh sample usually works
    ParseError,
    NotConfigured,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmErrorKind::ClientError | LlmErrorKind::NotConfigured)
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "model endpoint throttled",
            LlmErrorKind::ServerError => "model endpoint failed",
            LlmErrorKind::ClientError => "model request rejected",
            LlmErrorKind::NetworkError => "model endpoint unreachable",
            LlmErrorKind::Timeout => "model timed out",
            LlmErrorKind::ParseError => "unusable model response",
            LlmErrorKind::NotConfigured => "model not configured",
        };
        f.write_str(label)
    }
}
