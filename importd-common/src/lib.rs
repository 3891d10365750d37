//! # importd Common Library
//!
//! Shared code for the importd service and its tooling:
//! - Common error type
//! - Configuration loading and root folder resolution
//! - Import configuration types shared by the API and the coordinator
//! - Event types and the broadcast `EventBus`
//! - API request authentication primitives

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use types::{FieldMapping, ImportConfig, SourceKind};
