//! Authentication middleware
//!
//! Protected request bodies carry `timestamp` (Unix ms), `hash` (SHA-256 over
//! the canonical JSON body plus the shared secret) and an optional `caller`.
//! Checks run in order: timestamp window, hash, replay.

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use importd_common::api::auth::{now_millis, validate_hash, validate_timestamp_at, ApiAuthError};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::AppState;

/// Largest protected request body accepted, in bytes
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Validates timestamp, hash and replay for protected routes
///
/// A shared secret of 0 disables all checks.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if state.shared_secret == 0 {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AuthError::ParseError(format!("Failed to read body: {}", e)))?;

    let json_value: Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| AuthError::ParseError(format!("Invalid JSON: {}", e)))?;

    let timestamp = json_value
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or(AuthError::Rejected(ApiAuthError::MissingTimestamp))?;
    let hash = json_value
        .get("hash")
        .and_then(Value::as_str)
        .ok_or(AuthError::Rejected(ApiAuthError::MissingHash))?;
    let caller = json_value
        .get("caller")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let now = now_millis();
    validate_timestamp_at(timestamp, now, state.replay_guard.window_ms())
        .map_err(AuthError::Rejected)?;

    validate_hash(hash, &json_value, state.shared_secret).map_err(|e| {
        if let ApiAuthError::InvalidHash { provided, calculated } = &e {
            warn!(
                caller,
                "Hash validation failed: provided={}, calculated={}", provided, calculated
            );
        }
        AuthError::Rejected(e)
    })?;

    state
        .replay_guard
        .check_and_record(hash, timestamp, now)
        .map_err(|e| {
            warn!(caller, path = %parts.uri.path(), "Replayed request rejected");
            AuthError::Rejected(e)
        })?;

    debug!(caller, path = %parts.uri.path(), "Request authenticated");

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

#[derive(Debug)]
pub enum AuthError {
    /// Credentials missing, stale, wrong or replayed (401)
    Rejected(ApiAuthError),
    /// Body unreadable or not JSON (400)
    ParseError(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::Rejected(e) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", e.to_string()),
            AuthError::ParseError(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
            "error": {
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
