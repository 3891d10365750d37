//! Schedule entry persistence

use chrono::{DateTime, Utc};
use importd_common::{Error, Result, SourceKind};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::models::{ScheduleAction, ScheduleEntry};

fn entry_from_row(row: &SqliteRow) -> Result<ScheduleEntry> {
    let action: String = row.try_get("action")?;
    let source_kind: Option<String> = row.try_get("source_kind")?;
    let cadence_id: String = row.try_get("cadence_id")?;

    let next_run_at = parse_timestamp(row.try_get("next_run_at")?)?
        .ok_or_else(|| Error::Internal(format!("Schedule {} has no next_run_at", cadence_id)))?;

    Ok(ScheduleEntry {
        interval_secs: row.try_get("interval_secs")?,
        next_run_at,
        action: action.parse::<ScheduleAction>().map_err(Error::Internal)?,
        source_kind: source_kind
            .map(|k| k.parse::<SourceKind>())
            .transpose()
            .map_err(Error::Internal)?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        cadence_id,
    })
}

/// Insert the entry unless `cadence_id` already exists; true if inserted
pub async fn insert_if_absent(db: &SqlitePool, entry: &ScheduleEntry) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO schedule (cadence_id, interval_secs, next_run_at, action, source_kind, enabled)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.cadence_id)
    .bind(entry.interval_secs)
    .bind(format_timestamp(entry.next_run_at))
    .bind(entry.action.as_str())
    .bind(entry.source_kind.map(|k| k.as_str()))
    .bind(entry.enabled as i64)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert or replace the entry
pub async fn upsert(db: &SqlitePool, entry: &ScheduleEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO schedule (cadence_id, interval_secs, next_run_at, action, source_kind, enabled)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cadence_id) DO UPDATE SET
            interval_secs = excluded.interval_secs,
            next_run_at = excluded.next_run_at,
            action = excluded.action,
            source_kind = excluded.source_kind,
            enabled = excluded.enabled
        "#,
    )
    .bind(&entry.cadence_id)
    .bind(entry.interval_secs)
    .bind(format_timestamp(entry.next_run_at))
    .bind(entry.action.as_str())
    .bind(entry.source_kind.map(|k| k.as_str()))
    .bind(entry.enabled as i64)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn load(db: &SqlitePool, cadence_id: &str) -> Result<Option<ScheduleEntry>> {
    let row = sqlx::query(
        "SELECT cadence_id, interval_secs, next_run_at, action, source_kind, enabled FROM schedule WHERE cadence_id = ?",
    )
    .bind(cadence_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// All entries ordered by next run
pub async fn list(db: &SqlitePool) -> Result<Vec<ScheduleEntry>> {
    let rows = sqlx::query(
        "SELECT cadence_id, interval_secs, next_run_at, action, source_kind, enabled FROM schedule ORDER BY next_run_at",
    )
    .fetch_all(db)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Compare-and-set `next_run_at`: moves it only if it still equals `expected`
///
/// Returns false when another tick already advanced the entry.
pub async fn advance_next_run(
    db: &SqlitePool,
    cadence_id: &str,
    expected: DateTime<Utc>,
    next_run_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE schedule SET next_run_at = ? WHERE cadence_id = ? AND next_run_at = ?",
    )
    .bind(format_timestamp(next_run_at))
    .bind(cadence_id)
    .bind(format_timestamp(expected))
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Remove an entry; true if it existed
pub async fn delete(db: &SqlitePool, cadence_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM schedule WHERE cadence_id = ?")
        .bind(cadence_id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() == 1)
}
