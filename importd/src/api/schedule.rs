//! Schedule API handlers
//!
//! GET /schedule lists cadences; POST /schedule/tick/:cadence_id lets an
//! external timer (cron, systemd) drive a cadence.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::debug;

use crate::error::ApiResult;
use crate::models::{ScheduleEntry, TickOutcome};
use crate::AppState;

/// GET /schedule
pub async fn list_schedule(State(state): State<AppState>) -> ApiResult<Json<Vec<ScheduleEntry>>> {
    Ok(Json(state.coordinator.scheduler.entries().await?))
}

/// POST /schedule/tick/:cadence_id
///
/// 400 for an unknown cadence. A tick skipped because a run is active is a
/// normal 200 outcome.
pub async fn tick_cadence(
    State(state): State<AppState>,
    Path(cadence_id): Path<String>,
) -> ApiResult<Json<TickOutcome>> {
    let outcome = state.coordinator.scheduler.on_tick(&cadence_id).await?;
    debug!(cadence_id = %cadence_id, outcome = ?outcome, "External tick handled");
    Ok(Json(outcome))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/schedule/tick/:cadence_id", post(tick_cadence))
}

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/schedule", get(list_schedule))
}
