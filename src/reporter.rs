//! Evaluation reporter: POSTs the run result to the task's evaluation URL.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::error::TaskError;
use crate::publisher::RepositoryRef;
use crate::retry::RetryPolicy;
use crate::task::{Round, TaskRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Completed,
    Failed,
}

/// Body sent to the evaluator. `nonce` is echoed back exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationPayload {
    pub email: String,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    pub status: ReportStatus,
}

impl EvaluationPayload {
    pub fn new(request: &TaskRequest, repo: &RepositoryRef, status: ReportStatus) -> Self {
        Self {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            repo_url: repo.repo_url.clone(),
            commit_sha: repo.commit_sha.clone().unwrap_or_default(),
            pages_url: repo.pages_url.clone(),
            status,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("evaluation request failed: {0}")]
    Network(String),

    #[error("evaluator returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("evaluator rejected the payload with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ReportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::Network(_) | ReportError::Server { .. })
    }
}

impl From<ReportError> for TaskError {
    fn from(error: ReportError) -> Self {
        match error {
            ReportError::Rejected { status, body } => TaskError::ReportPermanent { status, message: body },
            other => TaskError::ReportTransient(other.to_string()),
        }
    }
}

pub struct EvaluationReporter {
    client: Client,
    policy: RetryPolicy,
}

impl EvaluationReporter {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, policy }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.evaluation_timeout,
            RetryPolicy::exponential(config.report_attempts),
        )
    }

    /// Deliver the payload, retrying network errors and 5xx responses.
    ///
    /// # Errors
    /// `ReportPermanent` on a 4xx; `ReportTransient` once attempts run out.
    pub async fn report(&self, url: &str, payload: &EvaluationPayload) -> Result<(), TaskError> {
        self.policy
            .run(
                "Evaluation report",
                move |_| self.post(url, payload),
                ReportError::is_retryable,
            )
            .await?;
        tracing::info!("Evaluation payload accepted by {}", url);
        Ok(())
    }

    /// Single best-effort delivery of a failure payload. Never retried.
    pub async fn notify_failure(&self, url: &str, payload: &EvaluationPayload) {
        match self.post(url, payload).await {
            Ok(()) => tracing::info!("Failure notification delivered to {}", url),
            Err(e) => tracing::warn!("Failure notification not delivered: {}", e),
        }
    }

    async fn post(&self, url: &str, payload: &EvaluationPayload) -> Result<(), ReportError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ReportError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = crate::util::truncate_chars(&response.text().await.unwrap_or_default(), 300, "...");
        if status.is_client_error() {
            Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(ReportError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }
}
