//! Import API handlers
//!
//! POST /import/validate, /import/start, /import/cancel, /import/emergency-reset
//! GET /import/progress, /import/stats

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use importd_common::{ImportConfig, SourceKind};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{ImportProgress, ImportStats};
use crate::services::ResetReport;
use crate::AppState;

/// What POST /import/validate checks
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidateTarget {
    /// Structural checks only
    #[default]
    Config,
    /// Structural checks plus a remote reachability probe
    Remote,
    /// Structural checks plus a local stat/open probe
    Local,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(rename = "type", default)]
    pub target: ValidateTarget,
    /// Config to check instead of the stored default
    #[serde(default)]
    pub config: Option<ImportConfig>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub errors: Vec<String>,
    pub remote_ready: bool,
    pub local_ready: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StartImportRequest {
    /// Defaults to the stored config's source kind
    #[serde(default)]
    pub source_kind: Option<SourceKind>,
    #[serde(default)]
    pub caller: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub success: bool,
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelImportRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyResetRequest {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
pub struct EmergencyResetResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: ResetReport,
}

/// POST /import/validate
///
/// Never mutates state. Returns 200 with `valid: false` for a bad config.
pub async fn validate_import(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    let config = match request.config {
        Some(config) => config,
        None => state.coordinator.current_config().await?,
    };

    let validator = &state.coordinator.validator;
    let report = match request.target {
        ValidateTarget::Config => validator.validate_config(&config).await,
        ValidateTarget::Remote => validator.validate_source(SourceKind::Remote, &config).await,
        ValidateTarget::Local => validator.validate_source(SourceKind::Local, &config).await,
    };

    let message = if report.valid {
        "configuration is valid".to_string()
    } else {
        report.errors.join("; ")
    };

    Ok(Json(ValidateResponse {
        valid: report.valid,
        errors: report.errors,
        remote_ready: report.remote_ready,
        local_ready: report.local_ready,
        message,
    }))
}

/// POST /import/start
///
/// 409 when a run is already active, 422 when validation fails.
pub async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<StartImportRequest>,
) -> ApiResult<Json<StartImportResponse>> {
    let config = state.coordinator.current_config().await?;
    let source_kind = request.source_kind.unwrap_or(config.source_kind);
    let trigger = format!("api:{}", request.caller.as_deref().unwrap_or("unknown"));

    let handle = state
        .coordinator
        .controller
        .start(source_kind, config, &trigger)
        .await?;

    Ok(Json(StartImportResponse {
        success: true,
        session_id: handle.session_id,
    }))
}

/// GET /import/progress
pub async fn get_progress(State(state): State<AppState>) -> ApiResult<Json<ImportProgress>> {
    Ok(Json(state.coordinator.controller.progress().await?))
}

/// POST /import/cancel
///
/// Returns once the request is recorded; the run stops at its next batch
/// boundary.
pub async fn cancel_import(
    State(state): State<AppState>,
    Json(request): Json<CancelImportRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.coordinator.controller.cancel(request.session_id).await?;
    Ok(Json(MessageResponse {
        message: "cancelled".to_string(),
    }))
}

/// POST /import/emergency-reset
pub async fn emergency_reset(
    State(state): State<AppState>,
    Json(request): Json<EmergencyResetRequest>,
) -> ApiResult<Json<EmergencyResetResponse>> {
    let report = state.coordinator.emergency_reset(request.confirm).await?;

    info!(
        previous_session = ?report.previous_session,
        was_stuck = report.was_stuck,
        "Emergency reset completed via API"
    );

    let message = match report.previous_session {
        Some(id) => format!("lock held by {} was reset", id),
        None => "no lock was held; state reset".to_string(),
    };

    Ok(Json(EmergencyResetResponse { message, report }))
}

/// GET /import/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<ImportStats>> {
    state
        .coordinator
        .controller
        .store()
        .read_stats()
        .await
        .map(Json)
        .map_err(ApiError::from)
}

/// Routes requiring authentication
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/import/validate", post(validate_import))
        .route("/import/start", post(start_import))
        .route("/import/cancel", post(cancel_import))
        .route("/import/emergency-reset", post(emergency_reset))
}

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/import/progress", get(get_progress))
        .route("/import/stats", get(get_stats))
}
