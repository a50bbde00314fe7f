//! API request and response types.

use serde::Serialize;
use uuid::Uuid;

use crate::task::Round;

/// Acknowledgment returned as soon as a task envelope is validated.
#[derive(Debug, Clone, Serialize)]
pub struct TaskAck {
    /// `accepted` for a new run, `duplicate` when the same submission is already running
    pub status: AckStatus,

    pub message: String,

    pub task: String,

    pub round: Round,

    /// Echoed exactly as received
    pub nonce: String,

    /// Identifier of the run handling this submission
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accepted,
    Duplicate,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` when every credential is configured, `degraded` otherwise
    pub status: String,

    pub version: String,

    pub shared_secret_configured: bool,

    pub github_configured: bool,

    pub llm_configured: bool,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
