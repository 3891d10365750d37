//! SQLite persistence for importd
//!
//! Tables:
//! - `run_lock`: singleton row (id = 1), the run lock
//! - `import_progress`: singleton row (id = 1), current/last run progress
//! - `schedule`: one row per recurring cadence
//! - `settings`: key/value (import config JSON, historical counters, shared secret)
//! - `imported_records`: rows written by the default record sink

pub mod lock;
pub mod progress;
pub mod schedule;
pub mod settings;
pub mod stats;

use chrono::{DateTime, Utc};
use importd_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Open (or create) the database and ensure all tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let path_str = db_path
        .to_str()
        .ok_or_else(|| Error::Config(format!("Invalid database path: {}", db_path.display())))?;

    tracing::debug!("Connecting to database: {}", path_str);

    let options = SqliteConnectOptions::from_str(path_str)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(250));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and seed singleton rows
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            held INTEGER NOT NULL DEFAULT 0,
            session_id TEXT,
            acquired_at TEXT,
            heartbeat_at TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_progress (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            status TEXT NOT NULL DEFAULT 'idle',
            session_id TEXT,
            source_kind TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            total INTEGER,
            percent REAL NOT NULL DEFAULT 0.0,
            imported INTEGER NOT NULL DEFAULT 0,
            failed_rows INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            updated_at TEXT NOT NULL,
            ended_at TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedule (
            cadence_id TEXT PRIMARY KEY,
            interval_secs INTEGER NOT NULL,
            next_run_at TEXT NOT NULL,
            action TEXT NOT NULL,
            source_kind TEXT,
            enabled INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imported_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            data TEXT NOT NULL,
            imported_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO run_lock (id, held, cancel_requested) VALUES (1, 0, 0)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO import_progress (id, status, updated_at) VALUES (1, 'idle', ?)")
        .bind(format_timestamp(Utc::now()))
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (settings, run_lock, import_progress, schedule, imported_records)");

    Ok(())
}

/// RFC 3339 with millisecond precision
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", s, e)))
        })
        .transpose()
}

pub(crate) fn parse_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value
        .map(|s| {
            Uuid::parse_str(&s).map_err(|e| Error::Internal(format!("Invalid session id '{}': {}", s, e)))
        })
        .transpose()
}
