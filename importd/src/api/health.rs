//! Health check endpoint
//!
//! Reports the health monitor's evaluation alongside uptime and build info.
//! Always answers 200 so dashboards can render a degraded state; `status`
//! carries the verdict.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::models::HealthCheckResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", "degraded" or "error"
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    /// Absent when the evaluation itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<HealthCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, checks, error) = match state.coordinator.check_health().await {
        Ok(result) if result.healthy => ("ok", Some(result), None),
        Ok(result) => ("degraded", Some(result), None),
        Err(e) => {
            warn!(error = %e, "Health evaluation failed");
            ("error", None, Some(e.to_string()))
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "importd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds,
        checks,
        error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
