//! pagesmith - HTTP Server Entry Point
//!
//! Wires configuration, the LLM client, the GitHub client and the evaluation
//! reporter into a task orchestrator, then serves the intake API.

use std::sync::Arc;

use pagesmith::{
    api,
    config::Config,
    generator::CodeGenerator,
    github::{GitHubClient, RepositoryHost},
    llm::{ChatCompletionsClient, LlmClient},
    publisher::RepositoryPublisher,
    reporter::EvaluationReporter,
    retry::RetryPolicy,
    TaskOrchestrator,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagesmith=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, max_concurrent_tasks={}",
        config.llm.model, config.pipeline.max_concurrent_tasks
    );
    if config.shared_secret.is_none() {
        warn!("SHARED_SECRET is not set; every task submission will be rejected");
    }
    if config.github.token.is_none() {
        warn!("GITHUB_TOKEN is not set; publishing will fail");
    }
    if config.llm.api_key.is_none() {
        warn!("LLM_API_KEY is not set; generation will fail");
    }

    let llm: Arc<dyn LlmClient> = Arc::new(ChatCompletionsClient::from_config(&config.llm));
    let host: Arc<dyn RepositoryHost> = Arc::new(GitHubClient::from_config(&config.github));

    let generator = CodeGenerator::from_config(llm, &config.llm, &config.pipeline);
    let publisher = RepositoryPublisher::new(
        host,
        config.github.repo_prefix.clone(),
        RetryPolicy::exponential(config.pipeline.publish_attempts),
    );
    let reporter = EvaluationReporter::from_config(&config.pipeline);
    let orchestrator = Arc::new(TaskOrchestrator::new(
        config.shared_secret.clone(),
        generator,
        publisher,
        reporter,
        &config.pipeline,
    ));

    // Start HTTP server
    info!("Starting server on {}:{}", config.host, config.port);
    api::serve(config, orchestrator).await?;

    Ok(())
}
