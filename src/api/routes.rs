//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth;
use super::types::*;
use crate::config::Config;
use crate::error::TaskError;
use crate::orchestrator::{RunRecord, Submission, TaskOrchestrator};
use crate::task::Round;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<TaskOrchestrator>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/initiate_task", post(initiate_task))
        .route("/api/task", post(initiate_task))
        .route("/api/health", get(health))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:task/:round", get(get_run))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until SIGINT/SIGTERM.
pub async fn serve(config: Config, orchestrator: Arc<TaskOrchestrator>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        orchestrator,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM. Background runs still in flight are abandoned.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let config = &state.config;
    let status = if config.credentials_configured() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        shared_secret_configured: config.shared_secret.is_some(),
        github_configured: config.github.token.is_some(),
        llm_configured: config.llm.api_key.is_some(),
    })
}

/// Validate a task envelope, start its run in the background and acknowledge.
async fn initiate_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<TaskAck>, ApiError> {
    let Json(body) = payload.map_err(|rejection| {
        tracing::warn!("Rejected task body: {}", rejection.body_text());
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid request: {}", rejection.body_text()),
        )
    })?;

    let submission = state.orchestrator.submit_json(body).await.map_err(|e| {
        tracing::warn!("Rejected task submission: {}", e);
        let status = match e {
            TaskError::Unauthorized => StatusCode::FORBIDDEN,
            TaskError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, e.to_string())
    })?;

    let request = submission.request();
    let (status, message) = match &submission {
        Submission::Accepted { .. } => (
            AckStatus::Accepted,
            format!("Task {} round {} accepted and processing", request.task, request.round),
        ),
        Submission::Duplicate { .. } => (
            AckStatus::Duplicate,
            format!("Task {} round {} is already being processed", request.task, request.round),
        ),
    };
    tracing::info!(
        task = %request.task,
        round = %request.round,
        nonce = %request.nonce,
        run_id = %submission.run_id(),
        "{}",
        message
    );

    Ok(Json(TaskAck {
        status,
        message,
        task: request.task.clone(),
        round: request.round,
        nonce: request.nonce.clone(),
        run_id: submission.run_id(),
    }))
}

/// List recorded runs, newest first.
async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunRecord>> {
    Json(state.orchestrator.registry().list().await)
}

/// Latest run for a task and round.
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path((task, round)): Path<(String, i64)>,
) -> Result<Json<RunRecord>, ApiError> {
    let round = Round::from_number(round)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "round must be 1 or 2"))?;
    state
        .orchestrator
        .registry()
        .latest(&task, round)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No run for task {} round {}", task, round)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::generator::testing::ScriptedLlm;
    use crate::generator::CodeGenerator;
    use crate::github::testing::InMemoryHost;
    use crate::llm::ChatOptions;
    use crate::publisher::RepositoryPublisher;
    use crate::reporter::EvaluationReporter;
    use crate::retry::RetryPolicy;

    fn app(config: Config) -> Router {
        let generator = CodeGenerator::new(
            Arc::new(ScriptedLlm::always("no files")),
            "test-model",
            ChatOptions::default(),
            Duration::from_secs(5),
            RetryPolicy::immediate(1),
        );
        let publisher = RepositoryPublisher::new(
            Arc::new(InMemoryHost::new("octocat")),
            "",
            RetryPolicy::immediate(1),
        );
        let reporter = EvaluationReporter::new(Duration::from_secs(1), RetryPolicy::immediate(1));
        let orchestrator = Arc::new(TaskOrchestrator::new(
            config.shared_secret.clone(),
            generator,
            publisher,
            reporter,
            &config.pipeline,
        ));
        router(Arc::new(AppState {
            config,
            orchestrator,
        }))
    }

    fn envelope(secret: &str) -> Value {
        json!({
            "email": "student@example.com",
            "secret": secret,
            "task": "t1",
            "round": 1,
            "nonce": "nonce-1",
            "brief": "Centered heading and a button",
            "checks": ["Page has an h1"],
            "evaluation_url": "http://127.0.0.1:9/notify",
            "attachments": []
        })
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_missing_credentials() {
        let mut config = Config::new("s3cret", "gh", "llm");
        config.github.token = None;
        let response = app(config)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["github_configured"], false);
        assert_eq!(body["llm_configured"], true);
    }

    #[tokio::test]
    async fn valid_envelope_is_acknowledged() {
        let response = app(Config::new("s3cret", "gh", "llm"))
            .oneshot(post_json("/initiate_task", &envelope("s3cret")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["task"], "t1");
        assert_eq!(body["round"], 1);
        assert_eq!(body["nonce"], "nonce-1");
        assert!(body["run_id"].is_string());
    }

    #[tokio::test]
    async fn wrong_secret_is_forbidden() {
        let response = app(Config::new("s3cret", "gh", "llm"))
            .oneshot(post_json("/api/task", &envelope("nope")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Unauthorized: invalid secret");
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let mut body = envelope("s3cret");
        body.as_object_mut().unwrap().remove("brief");
        let response = app(Config::new("s3cret", "gh", "llm"))
            .oneshot(post_json("/initiate_task", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mistyped_fields_are_hidden_behind_the_secret() {
        let mut body = envelope("nope");
        body["nonce"] = json!(123);
        let response = app(Config::new("s3cret", "gh", "llm"))
            .oneshot(post_json("/initiate_task", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        body["secret"] = json!("s3cret");
        let response = app(Config::new("s3cret", "gh", "llm"))
            .oneshot(post_json("/initiate_task", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/initiate_task")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app(Config::new("s3cret", "gh", "llm")).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn runs_require_bearer_secret() {
        let app = app(Config::new("s3cret", "gh", "llm"));

        let anonymous = app
            .clone()
            .oneshot(Request::get("/api/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let authorized = app
            .oneshot(
                Request::get("/api/runs")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
        assert_eq!(json_body(authorized).await, json!([]));
    }

    #[tokio::test]
    async fn submitted_run_is_visible() {
        let app = app(Config::new("s3cret", "gh", "llm"));
        let submitted = app
            .clone()
            .oneshot(post_json("/initiate_task", &envelope("s3cret")))
            .await
            .unwrap();
        assert_eq!(submitted.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/runs/t1/1")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["task"], "t1");
        assert_eq!(body["nonce"], "nonce-1");

        let missing = app
            .oneshot(
                Request::get("/api/runs/t1/2")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
