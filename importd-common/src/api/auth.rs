//! API request authentication via timestamp, hash and replay guard
//!
//! Every mutating request body carries:
//! - `timestamp`: Unix epoch milliseconds
//! - `hash`: SHA-256 (64 hex chars) of the canonical JSON body, with the hash
//!   field replaced by 64 zeros, followed by the shared secret in decimal
//! - `caller`: free-form caller identity recorded in logs and run triggers
//!
//! A shared secret of `0` disables checking. The timestamp must fall inside
//! the configured past window and at most 1ms in the future; a hash already
//! accepted inside the window is rejected as a replay.
//!
//! This module holds only pure functions and database operations; the axum
//! middleware lives in the service crate.

use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;

/// Placeholder substituted for the hash field before hashing
pub const DUMMY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Maximum tolerated clock drift into the future, in milliseconds
pub const MAX_FUTURE_MS: i64 = 1;

/// Authentication error types
#[derive(Debug, Clone)]
pub enum ApiAuthError {
    /// Timestamp outside acceptable window
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Hash does not match calculated value
    InvalidHash { provided: String, calculated: String },

    /// Hash already used inside the timestamp window
    Replayed,

    /// Timestamp field missing from request
    MissingTimestamp,

    /// Hash field missing from request
    MissingHash,

    /// Database error loading shared secret
    DatabaseError(String),

    /// Failed to parse request body
    ParseError(String),
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid timestamp: {}", reason)
            }
            ApiAuthError::InvalidHash { .. } => write!(f, "Invalid hash"),
            ApiAuthError::Replayed => write!(f, "Request already processed (replay rejected)"),
            ApiAuthError::MissingTimestamp => write!(f, "Missing timestamp field"),
            ApiAuthError::MissingHash => write!(f, "Missing hash field"),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
            ApiAuthError::ParseError(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

/// Current time in Unix epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ========================================
// Shared Secret Management
// ========================================

/// Load shared secret from the `settings` table (key `api_shared_secret`)
///
/// Generates and stores a new non-zero secret when none exists.
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((value,)) => value
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e))),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate and store a crypto-random non-zero secret
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let secret: i64 = {
        let mut rng = rand::thread_rng();
        loop {
            let val = rng.gen::<i64>();
            if val != 0 {
                break val;
            }
        }
    };

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(secret)
}

// ========================================
// Timestamp Validation
// ========================================

/// Validate `timestamp` against `now` with a past window of `window_ms`
///
/// # Examples
///
/// ```
/// use importd_common::api::auth::validate_timestamp_at;
///
/// let now = 1_730_000_000_000i64;
/// assert!(validate_timestamp_at(now - 500, now, 1000).is_ok());
/// assert!(validate_timestamp_at(now - 2000, now, 1000).is_err());
/// assert!(validate_timestamp_at(now + 5, now, 1000).is_err());
/// ```
pub fn validate_timestamp_at(timestamp: i64, now: i64, window_ms: i64) -> Result<(), ApiAuthError> {
    let diff = now - timestamp;

    if diff > window_ms {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms past)", diff, window_ms),
        });
    }

    if diff < -MAX_FUTURE_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms future)",
                diff.abs(),
                MAX_FUTURE_MS
            ),
        });
    }

    Ok(())
}

// ========================================
// Hash Calculation and Validation
// ========================================

/// Calculate the request hash
///
/// # Examples
///
/// ```
/// use importd_common::api::auth::calculate_hash;
/// use serde_json::json;
///
/// let body = json!({"source_kind": "local", "timestamp": 1730000000000i64, "hash": "x"});
/// let hash = calculate_hash(&body, 123456789);
/// assert_eq!(hash.len(), 64);
/// ```
pub fn calculate_hash(json_value: &Value, shared_secret: i64) -> String {
    let mut value = json_value.clone();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("hash".to_string(), Value::String(DUMMY_HASH.to_string()));
    }

    let canonical = to_canonical_json(&value);
    let to_hash = format!("{}{}", canonical, shared_secret);

    let mut hasher = Sha256::new();
    hasher.update(to_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Convert JSON to canonical form (sorted keys, no whitespace)
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let items: Vec<String> = pairs
                .into_iter()
                .map(|(k, v)| format!("\"{}\":{}", k, to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

/// Validate hash matches calculated value
pub fn validate_hash(
    provided_hash: &str,
    json_value: &Value,
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_hash(json_value, shared_secret);

    if provided_hash != calculated {
        return Err(ApiAuthError::InvalidHash {
            provided: provided_hash.to_string(),
            calculated,
        });
    }

    Ok(())
}

/// Sign a request body in place: sets `timestamp` and `hash`
///
/// Used by the CLI and tests to produce authenticated requests.
pub fn sign_request(body: &mut Value, shared_secret: i64, timestamp: i64) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("timestamp".to_string(), Value::from(timestamp));
        obj.insert("hash".to_string(), Value::String(DUMMY_HASH.to_string()));
    }
    let hash = calculate_hash(body, shared_secret);
    if let Some(obj) = body.as_object_mut() {
        obj.insert("hash".to_string(), Value::String(hash));
    }
}

// ========================================
// Replay Guard
// ========================================

/// Remembers accepted request hashes for the length of the timestamp window
pub struct ReplayGuard {
    window_ms: i64,
    seen: Mutex<HashMap<String, i64>>,
}

impl ReplayGuard {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Record `hash` seen at `timestamp`; fails if it was already recorded
    pub fn check_and_record(&self, hash: &str, timestamp: i64, now: i64) -> Result<(), ApiAuthError> {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Entries older than the window can no longer pass timestamp validation
        let horizon = now - self.window_ms - MAX_FUTURE_MS;
        seen.retain(|_, ts| *ts >= horizon);

        if seen.contains_key(hash) {
            return Err(ApiAuthError::Replayed);
        }
        seen.insert(hash.to_string(), timestamp);
        Ok(())
    }
}
