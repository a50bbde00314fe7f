//! Synchronous request validation.
//!
//! Runs inside the HTTP handler before anything is scheduled. A rejected
//! envelope never reaches the background pipeline.

use crate::error::TaskError;
use crate::util::constant_time_eq;

use super::request::{Round, TaskEnvelope, TaskRequest};

/// Decode a raw JSON body into an envelope, checking the secret first.
///
/// A body with the right secret but badly typed fields is `InvalidRequest`;
/// without the right secret the typing is never looked at.
///
/// # Errors
/// - `TaskError::Unauthorized` on a missing or mismatched secret
/// - `TaskError::InvalidRequest` when a field has the wrong JSON type
pub fn decode_envelope(body: serde_json::Value, shared_secret: Option<&str>) -> Result<TaskEnvelope, TaskError> {
    let provided = body.get("secret").and_then(|v| v.as_str());
    check_secret(provided, shared_secret)?;
    serde_json::from_value(body).map_err(|e| TaskError::InvalidRequest(e.to_string()))
}

/// Validate an envelope against the configured shared secret.
///
/// The secret is checked first so unauthenticated callers learn nothing
/// about the expected schema. When no secret is configured every request is
/// rejected.
///
/// # Errors
/// - `TaskError::Unauthorized` on a missing or mismatched secret
/// - `TaskError::InvalidRequest` naming every missing field, or the first badly typed one
pub fn validate(envelope: TaskEnvelope, shared_secret: Option<&str>) -> Result<TaskRequest, TaskError> {
    check_secret(envelope.secret.as_deref(), shared_secret)?;

    let mut missing = Vec::new();
    let email = required(envelope.email, "email", &mut missing);
    let task = required(envelope.task, "task", &mut missing);
    let nonce = required(envelope.nonce, "nonce", &mut missing);
    let brief = required(envelope.brief, "brief", &mut missing);
    let evaluation_url = required(envelope.evaluation_url, "evaluation_url", &mut missing);
    if envelope.round.is_none() {
        missing.push("round");
    }
    if !missing.is_empty() {
        return Err(TaskError::InvalidRequest(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let round = match envelope.round.as_ref().and_then(|v| v.as_i64()) {
        Some(n) => Round::from_number(n)
            .ok_or_else(|| TaskError::InvalidRequest(format!("Invalid round number: {}", n)))?,
        None => {
            return Err(TaskError::InvalidRequest(
                "round must be the integer 1 or 2".to_string(),
            ))
        }
    };

    let evaluation_url = evaluation_url.unwrap_or_default();
    check_callback_url(&evaluation_url)?;

    let checks = envelope
        .checks
        .unwrap_or_default()
        .into_iter()
        .map(|check| match check {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .filter(|check| !check.trim().is_empty())
        .collect();

    Ok(TaskRequest {
        email: email.unwrap_or_default(),
        task: task.unwrap_or_default(),
        round,
        nonce: nonce.unwrap_or_default(),
        brief: brief.unwrap_or_default(),
        checks,
        evaluation_url,
        attachments: envelope.attachments.unwrap_or_default(),
    })
}

fn check_secret(provided: Option<&str>, shared_secret: Option<&str>) -> Result<(), TaskError> {
    let expected = shared_secret.unwrap_or("");
    if expected.is_empty() || !constant_time_eq(provided.unwrap_or(""), expected) {
        return Err(TaskError::Unauthorized);
    }
    Ok(())
}

fn required(value: Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            missing.push(name);
            None
        }
    }
}

fn check_callback_url(raw: &str) -> Result<(), TaskError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| TaskError::InvalidRequest(format!("evaluation_url is not a valid URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(()),
        scheme => Err(TaskError::InvalidRequest(format!(
            "evaluation_url must be an http(s) URL, got scheme '{}'",
            scheme
        ))),
    }
}
