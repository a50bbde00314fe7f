//! Code generator adapter.
//!
//! Turns a validated task (plus decoded attachments and, for revisions, the
//! repository's current files) into a [`GeneratedFileSet`] by asking the
//! configured LLM and parsing its answer. The adapter returns data only; it
//! never touches the repository.

mod files;
mod parse;
mod prompt;
mod templates;

pub use files::{normalize_path, GeneratedFileSet, PathError, ENTRY_POINT};
pub use parse::parse_response;
pub use prompt::build_messages;
pub use templates::{default_readme, mit_license, LICENSE_PATH, README_PATH};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::attachments::ResolvedAttachment;
use crate::config::{LlmConfig, PipelineConfig};
use crate::error::TaskError;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError};
use crate::retry::RetryPolicy;
use crate::task::{Round, TaskRequest};

/// Everything one generation call needs.
pub struct GenerationInput<'a> {
    pub request: &'a TaskRequest,
    pub attachments: &'a [ResolvedAttachment],
    /// Current repository files (Round 2 only)
    pub prior_files: Option<&'a BTreeMap<String, String>>,
}

/// Why a single attempt did not produce a usable file set.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("{0}")]
    Llm(LlmError),
    #[error("unusable model output: {0}")]
    Unusable(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Llm(e) => e.is_transient(),
            AttemptError::Unusable(_) => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::Llm(e) => e.retry_after,
            AttemptError::Unusable(_) => None,
        }
    }
}

/// LLM-backed generator with a bounded retry budget.
pub struct CodeGenerator {
    llm: Arc<dyn LlmClient>,
    model: String,
    options: ChatOptions,
    timeout: Duration,
    policy: RetryPolicy,
}

impl CodeGenerator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        options: ChatOptions,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            options,
            timeout,
            policy,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &LlmConfig, pipeline: &PipelineConfig) -> Self {
        Self::new(
            llm,
            config.model.clone(),
            ChatOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
            },
            config.timeout,
            RetryPolicy::exponential(pipeline.generation_attempts),
        )
    }

    /// Generate the application's files.
    ///
    /// # Errors
    /// `TaskError::GenerationFailed` when every attempt failed, or on the
    /// first non-retryable model error (bad credentials, rejected request).
    pub async fn generate(&self, input: &GenerationInput<'_>) -> Result<GeneratedFileSet, TaskError> {
        let messages = build_messages(input.request, input.attachments, input.prior_files);

        let messages = &messages;
        let mut files = self
            .policy
            .run_with_hint(
                "Code generation",
                move |attempt| async move {
                    tracing::debug!(attempt = attempt + 1, "Requesting generated files");
                    self.attempt(messages).await
                },
                AttemptError::is_retryable,
                AttemptError::retry_after,
            )
            .await
            .map_err(|e| TaskError::GenerationFailed(e.to_string()))?;

        // Revisions leave files the model did not mention untouched, so the
        // defaults only fill gaps in a first round. Constant paths; insertion
        // cannot fail.
        if input.request.round == Round::Initial {
            let _ = files.insert_if_missing(LICENSE_PATH, mit_license);
            let _ = files.insert_if_missing(README_PATH, || {
                default_readme(&input.request.task, &input.request.brief)
            });
        }

        tracing::info!(
            files = files.len(),
            paths = ?files.paths().collect::<Vec<_>>(),
            "Generated file set accepted"
        );
        Ok(files)
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<GeneratedFileSet, AttemptError> {
        let call = self
            .llm
            .chat_completion(&self.model, messages, self.options.clone());
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AttemptError::Llm(LlmError::timeout(self.timeout)))?
            .map_err(AttemptError::Llm)?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "LLM usage"
            );
        }
        if response.finish_reason.as_deref() == Some("length") {
            tracing::warn!("Model output was cut off at the token limit");
        }

        let content = response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AttemptError::Llm(LlmError::parse_error("empty completion")))?;

        let files = parse_response(&content);
        if files.is_empty() {
            return Err(AttemptError::Unusable("no files found in response".to_string()));
        }
        if !files.has_entry_point() {
            return Err(AttemptError::Unusable(format!(
                "no {} among {} files",
                ENTRY_POINT,
                files.len()
            )));
        }
        Ok(files)
    }
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish()
    }
}
