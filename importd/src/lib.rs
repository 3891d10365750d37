//! importd library
//!
//! Import job coordination: a single-writer run lock, durable progress,
//! cadence-driven scheduling, stuck-run detection and operator recovery.
//! The binary wraps this in an axum gateway and a CLI.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, ImportError};

use axum::Router;
use chrono::{DateTime, Utc};
use importd_common::api::auth::ReplayGuard;
use importd_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::Coordinator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub coordinator: Coordinator,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Shared secret for request authentication (0 disables checks)
    pub shared_secret: i64,
    /// Recently accepted request hashes
    pub replay_guard: Arc<ReplayGuard>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        coordinator: Coordinator,
        event_bus: EventBus,
        shared_secret: i64,
        timestamp_window_ms: i64,
    ) -> Self {
        Self {
            db,
            coordinator,
            event_bus,
            shared_secret,
            replay_guard: Arc::new(ReplayGuard::new(timestamp_window_ms)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Mutating endpoints sit behind `auth_middleware`; reads, SSE and health
/// are public.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::get;
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let protected = Router::new()
        .merge(api::import::protected_routes())
        .merge(api::schedule::protected_routes())
        .merge(api::config::protected_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .merge(api::import::public_routes())
        .route("/import/events", get(api::import_event_stream))
        .merge(api::schedule::public_routes())
        .merge(api::config::public_routes())
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
