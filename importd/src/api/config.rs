//! Default import configuration
//!
//! GET /config returns the stored config (or the file default); POST /config
//! stores a new one after structural validation.

use axum::{extract::State, routing::get, Json, Router};
use importd_common::ImportConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db;
use crate::error::{ApiResult, ImportError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub config: ImportConfig,
}

#[derive(Debug, Serialize)]
pub struct SetConfigResponse {
    pub success: bool,
    pub message: String,
}

/// GET /config
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<ImportConfig>> {
    Ok(Json(state.coordinator.current_config().await?))
}

/// POST /config
///
/// 422 when the config fails structural validation; nothing is stored.
/// Applies to runs started afterwards only.
pub async fn set_config(
    State(state): State<AppState>,
    Json(request): Json<SetConfigRequest>,
) -> ApiResult<Json<SetConfigResponse>> {
    let report = state.coordinator.validator.validate_config(&request.config).await;
    if !report.valid {
        return Err(ImportError::Validation(report.errors).into());
    }

    db::settings::save_import_config(&state.db, &request.config).await?;

    info!(
        source_kind = %request.config.source_kind,
        mappings = request.config.mappings.len(),
        batch_size = request.config.batch_size,
        "Default import config updated"
    );

    Ok(Json(SetConfigResponse {
        success: true,
        message: "configuration saved".to_string(),
    }))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/config", axum::routing::post(set_config))
}

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/config", get(get_config))
}
