//! Run lock operations
//!
//! Every state change is a single conditional UPDATE against the singleton
//! row; the affected-row count tells the caller whether it won.

use chrono::{DateTime, Utc};
use importd_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::models::RunLock;

/// Compare-and-set: take the lock only if nobody holds it
pub async fn try_acquire(db: &SqlitePool, session_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let ts = format_timestamp(now);
    let result = sqlx::query(
        r#"
        UPDATE run_lock
        SET held = 1, session_id = ?, acquired_at = ?, heartbeat_at = ?, cancel_requested = 0
        WHERE id = 1 AND held = 0
        "#,
    )
    .bind(session_id.to_string())
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Refresh `heartbeat_at` for the holder; false if `session_id` is not the holder
pub async fn heartbeat(db: &SqlitePool, session_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE run_lock SET heartbeat_at = ? WHERE id = 1 AND held = 1 AND session_id = ?",
    )
    .bind(format_timestamp(now))
    .bind(session_id.to_string())
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Clear the lock if `session_id` holds it
pub async fn release(db: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE run_lock
        SET held = 0, session_id = NULL, acquired_at = NULL, heartbeat_at = NULL, cancel_requested = 0
        WHERE id = 1 AND held = 1 AND session_id = ?
        "#,
    )
    .bind(session_id.to_string())
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Set the persisted cancellation flag for the holder
pub async fn request_cancel(db: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE run_lock SET cancel_requested = 1 WHERE id = 1 AND held = 1 AND session_id = ?",
    )
    .bind(session_id.to_string())
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Read the lock row
pub async fn load(db: &SqlitePool) -> Result<RunLock> {
    let row = sqlx::query(
        "SELECT held, session_id, acquired_at, heartbeat_at, cancel_requested FROM run_lock WHERE id = 1",
    )
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(RunLock::default());
    };

    Ok(RunLock {
        held: row.try_get::<i64, _>("held")? != 0,
        session_id: parse_uuid(row.try_get("session_id")?)?,
        acquired_at: parse_timestamp(row.try_get("acquired_at")?)?,
        heartbeat_at: parse_timestamp(row.try_get("heartbeat_at")?)?,
        cancel_requested: row.try_get::<i64, _>("cancel_requested")? != 0,
    })
}

/// Unconditionally clear lock and reset progress to idle
///
/// Both rows change in one transaction. Returns the previous holder.
pub async fn force_release(db: &SqlitePool) -> Result<Option<Uuid>> {
    let mut tx = db.begin().await?;

    let previous: Option<(Option<String>,)> =
        sqlx::query_as("SELECT session_id FROM run_lock WHERE id = 1 AND held = 1")
            .fetch_optional(&mut *tx)
            .await?;

    sqlx::query(
        r#"
        UPDATE run_lock
        SET held = 0, session_id = NULL, acquired_at = NULL, heartbeat_at = NULL, cancel_requested = 0
        WHERE id = 1
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE import_progress
        SET status = 'idle', session_id = NULL, source_kind = NULL, processed = 0, total = NULL,
            percent = 0.0, imported = 0, failed_rows = 0, started_at = NULL, updated_at = ?,
            ended_at = NULL, last_error = NULL
        WHERE id = 1
        "#,
    )
    .bind(format_timestamp(Utc::now()))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    parse_uuid(previous.and_then(|(id,)| id))
}
