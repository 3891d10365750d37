//! Shared HTTP API functionality
//!
//! Contains only pure functions, database operations and shared types; the
//! service crate wraps them in framework-specific middleware.

pub mod auth;

pub use auth::{
    calculate_hash, initialize_shared_secret, load_shared_secret, sign_request, validate_hash,
    validate_timestamp_at, ApiAuthError, ReplayGuard,
};
