//! Bearer auth for the run inspection endpoints.
//!
//! The operator presents the configured shared secret as
//! `Authorization: Bearer <secret>`. Task submissions are not covered here;
//! their secret travels inside the envelope and is checked by the validator.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::routes::AppState;
use super::types::ErrorResponse;
use crate::util::constant_time_eq;

fn reject(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Fail closed when no secret is configured.
    let secret = match state.config.shared_secret.as_deref() {
        Some(s) => s,
        None => return reject(StatusCode::FORBIDDEN, "SHARED_SECRET not configured"),
    };

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    let token = auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .unwrap_or("")
        .trim();

    if token.is_empty() {
        return reject(StatusCode::UNAUTHORIZED, "Missing Authorization header");
    }

    if constant_time_eq(token, secret) {
        next.run(req).await
    } else {
        reject(StatusCode::UNAUTHORIZED, "Invalid token")
    }
}
