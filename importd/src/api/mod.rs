//! HTTP gateway handlers

pub mod auth;
pub mod config;
pub mod health;
pub mod import;
pub mod schedule;
pub mod sse;

pub use auth::auth_middleware;
pub use health::health_routes;
pub use sse::import_event_stream;
