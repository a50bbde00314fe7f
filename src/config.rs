//! Configuration management for pagesmith.
//!
//! Configuration is read once from environment variables (a `.env` file in the
//! working directory is loaded first by `main`):
//! - `SHARED_SECRET` - Secret every inbound task envelope must carry.
//! - `GITHUB_TOKEN` - Token used for repository creation, commits and Pages.
//! - `LLM_API_KEY` - Key for the code-generation service (`AIPIPE_API_KEY` is accepted too).
//! - `LLM_API_URL` - Optional. OpenAI-compatible chat completions endpoint.
//! - `LLM_MODEL` - Optional. Model identifier. Defaults to `claude-3-5-sonnet-20241022`.
//! - `LLM_MAX_TOKENS` - Optional. Defaults to `8000`.
//! - `LLM_TEMPERATURE` - Optional. Defaults to `0.7`.
//! - `LLM_TIMEOUT_SECS` - Optional. Per-call generation timeout. Defaults to `120`.
//! - `GITHUB_API_URL` - Optional. Defaults to `https://api.github.com`.
//! - `REPO_PREFIX` - Optional. Prepended to every derived repository name.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `52128`.
//! - `MAX_CONCURRENT_TASKS` - Optional. Background run limit. Defaults to `4`.
//! - `GENERATION_ATTEMPTS` / `PUBLISH_ATTEMPTS` / `REPORT_ATTEMPTS` - Optional retry caps.
//! - `EVALUATION_TIMEOUT_SECS` - Optional. Defaults to `10`.
//! - `NOTIFY_ON_FAILURE` - Optional. Send a `failed` payload when a repository exists. Defaults to `false`.
//!
//! Missing credentials do not prevent startup; the health endpoint reports them
//! as unconfigured so they can be injected after boot.

use std::time::Duration;

use thiserror::Error;

use crate::util::env_var_bool;

pub const DEFAULT_LLM_API_URL: &str = "https://api.aipipe.org/v1/chat/completions";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the code-generation service.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Bearer key, if configured
    pub api_key: Option<String>,

    /// Chat completions endpoint
    pub api_url: String,

    /// Model identifier sent with every request
    pub model: String,

    pub max_tokens: u64,

    pub temperature: f64,

    /// Upper bound for a single generation call
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_LLM_API_URL.to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 8000,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Settings for the GitHub hosting provider.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// Personal access token, if configured
    pub token: Option<String>,

    /// REST API base URL (no trailing slash)
    pub api_url: String,

    /// Prefix for derived repository names
    pub repo_prefix: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
            repo_prefix: String::new(),
        }
    }
}

/// Retry caps and timeouts for the background pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum runs executing at once
    pub max_concurrent_tasks: usize,

    pub generation_attempts: u32,

    pub publish_attempts: u32,

    pub report_attempts: u32,

    /// Timeout for one evaluation POST
    pub evaluation_timeout: Duration,

    /// Post a best-effort `failed` payload when a run dies after a repository exists
    pub notify_on_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            generation_attempts: 3,
            publish_attempts: 3,
            report_attempts: 5,
            evaluation_timeout: Duration::from_secs(10),
            notify_on_failure: false,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secret inbound task envelopes must match
    pub shared_secret: Option<String>,

    pub llm: LlmConfig,

    pub github: GitHubConfig,

    pub pipeline: PipelineConfig,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric or boolean-like variable
    /// cannot be parsed. Absent credentials are not an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm = LlmConfig {
            api_key: non_empty_var("LLM_API_KEY").or_else(|| non_empty_var("AIPIPE_API_KEY")),
            api_url: non_empty_var("LLM_API_URL")
                .unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string()),
            model: non_empty_var("LLM_MODEL")
                .unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            max_tokens: parse_var("LLM_MAX_TOKENS", 8000)?,
            temperature: parse_var("LLM_TEMPERATURE", 0.7)?,
            timeout: Duration::from_secs(parse_var("LLM_TIMEOUT_SECS", 120)?),
        };

        let github = GitHubConfig {
            token: non_empty_var("GITHUB_TOKEN"),
            api_url: non_empty_var("GITHUB_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            repo_prefix: std::env::var("REPO_PREFIX").unwrap_or_default(),
        };

        let max_concurrent_tasks: usize = parse_var("MAX_CONCURRENT_TASKS", 4)?;
        if max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_TASKS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let pipeline = PipelineConfig {
            max_concurrent_tasks,
            generation_attempts: parse_attempts("GENERATION_ATTEMPTS", 3)?,
            publish_attempts: parse_attempts("PUBLISH_ATTEMPTS", 3)?,
            report_attempts: parse_attempts("REPORT_ATTEMPTS", 5)?,
            evaluation_timeout: Duration::from_secs(parse_var("EVALUATION_TIMEOUT_SECS", 10)?),
            notify_on_failure: env_var_bool("NOTIFY_ON_FAILURE", false),
        };

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_var("PORT", 52128)?;

        Ok(Self {
            shared_secret: non_empty_var("SHARED_SECRET"),
            llm,
            github,
            pipeline,
            host,
            port,
        })
    }

    /// Create a config with custom credentials (useful for testing).
    pub fn new(shared_secret: &str, github_token: &str, llm_api_key: &str) -> Self {
        Self {
            shared_secret: Some(shared_secret.to_string()),
            llm: LlmConfig {
                api_key: Some(llm_api_key.to_string()),
                ..LlmConfig::default()
            },
            github: GitHubConfig {
                token: Some(github_token.to_string()),
                ..GitHubConfig::default()
            },
            pipeline: PipelineConfig::default(),
            host: "127.0.0.1".to_string(),
            port: 52128,
        }
    }

    /// True when every credential the pipeline needs is present.
    pub fn credentials_configured(&self) -> bool {
        self.shared_secret.is_some() && self.github.token.is_some() && self.llm.api_key.is_some()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn parse_attempts(name: &str, default: u32) -> Result<u32, ConfigError> {
    let attempts = parse_var(name, default)?;
    if attempts == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be at least 1".to_string(),
        ));
    }
    Ok(attempts)
}
