//! Task failure taxonomy.
//!
//! Component errors (`LlmError`, `HostError`, `ReportError`) are classified at
//! the stage boundary and converted into a [`TaskError`]. The orchestrator only
//! ever reasons about this type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a task can be rejected or fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Shared secret missing or wrong (synchronous)
    #[error("Unauthorized: invalid secret")]
    Unauthorized,

    /// Envelope missing fields or badly typed (synchronous)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// One attachment could not be decoded; never fatal
    #[error("Attachment '{name}' could not be decoded: {reason}")]
    AttachmentDecode { name: String, reason: String },

    /// Model output unusable after all attempts
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Network error or rate limit from the hosting provider, retries exhausted
    #[error("Publish failed (transient): {0}")]
    PublishTransient(String),

    /// Auth, quota or invalid name at the hosting provider
    #[error("Publish failed: {0}")]
    PublishPermanent(String),

    /// Round 2 for a task whose repository does not exist
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// Network error or 5xx from the evaluator, retries exhausted
    #[error("Report failed (transient): {0}")]
    ReportTransient(String),

    /// Evaluator answered with a 4xx
    #[error("Report rejected (HTTP {status}): {message}")]
    ReportPermanent { status: u16, message: String },
}

impl TaskError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::Unauthorized => FailureKind::Unauthorized,
            TaskError::InvalidRequest(_) => FailureKind::InvalidRequest,
            TaskError::AttachmentDecode { .. } => FailureKind::AttachmentDecodeError,
            TaskError::GenerationFailed(_) => FailureKind::GenerationFailed,
            TaskError::PublishTransient(_) => FailureKind::PublishTransientError,
            TaskError::PublishPermanent(_) => FailureKind::PublishPermanentError,
            TaskError::RepositoryNotFound(_) => FailureKind::RepositoryNotFound,
            TaskError::ReportTransient(_) => FailureKind::ReportTransientError,
            TaskError::ReportPermanent { .. } => FailureKind::ReportPermanentError,
        }
    }
}

/// Serializable failure classification recorded on a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Unauthorized,
    InvalidRequest,
    AttachmentDecodeError,
    GenerationFailed,
    PublishTransientError,
    PublishPermanentError,
    RepositoryNotFound,
    ReportTransientError,
    ReportPermanentError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_variant() {
        assert_eq!(
            TaskError::RepositoryNotFound("t1".into()).kind(),
            FailureKind::RepositoryNotFound
        );
        assert_eq!(
            TaskError::ReportPermanent {
                status: 400,
                message: "bad".into()
            }
            .kind(),
            FailureKind::ReportPermanentError
        );
    }

    #[test]
    fn failure_kind_serializes_by_name() {
        let json = serde_json::to_string(&FailureKind::GenerationFailed).unwrap();
        assert_eq!(json, "\"GenerationFailed\"");
    }
}
