//! Progress record persistence

use importd_common::{Error, Result, SourceKind};
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::models::{ImportProgress, ImportStatus};

/// Overwrite the singleton progress row
///
/// A record carrying a session id is written only while that session holds
/// the run lock; returns false when the write was refused.
pub async fn save(db: &SqlitePool, progress: &ImportProgress) -> Result<bool> {
    let session = progress.session_id.map(|id| id.to_string());
    let result = sqlx::query(
        r#"
        UPDATE import_progress
        SET status = ?, session_id = ?, source_kind = ?, processed = ?, total = ?, percent = ?,
            imported = ?, failed_rows = ?, started_at = ?, updated_at = ?, ended_at = ?, last_error = ?
        WHERE id = 1
          AND (?13 IS NULL
               OR EXISTS (SELECT 1 FROM run_lock WHERE id = 1 AND held = 1 AND session_id = ?13))
        "#,
    )
    .bind(progress.status.as_str())
    .bind(&session)
    .bind(progress.source_kind.map(|k| k.as_str()))
    .bind(progress.processed as i64)
    .bind(progress.total.map(|t| t as i64))
    .bind(progress.percent)
    .bind(progress.imported as i64)
    .bind(progress.failed_rows as i64)
    .bind(progress.started_at.map(format_timestamp))
    .bind(format_timestamp(progress.updated_at))
    .bind(progress.ended_at.map(format_timestamp))
    .bind(progress.last_error.as_deref())
    .bind(&session)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark an active progress record failed when no lock backs it
///
/// Single statement, so a run that acquires or releases concurrently is
/// never misclassified. Returns true if a record was changed.
pub async fn fail_orphaned(db: &SqlitePool, reason: &str) -> Result<bool> {
    let now = format_timestamp(chrono::Utc::now());
    let result = sqlx::query(
        r#"
        UPDATE import_progress
        SET status = 'failed', last_error = ?, updated_at = ?, ended_at = ?
        WHERE id = 1
          AND status IN ('validating', 'processing')
          AND NOT EXISTS (SELECT 1 FROM run_lock WHERE id = 1 AND held = 1)
        "#,
    )
    .bind(reason)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Read the singleton progress row
pub async fn load(db: &SqlitePool) -> Result<ImportProgress> {
    let row = sqlx::query(
        r#"
        SELECT status, session_id, source_kind, processed, total, percent, imported, failed_rows,
               started_at, updated_at, ended_at, last_error
        FROM import_progress WHERE id = 1
        "#,
    )
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(ImportProgress::idle());
    };

    let status: String = row.try_get("status")?;
    let source_kind: Option<String> = row.try_get("source_kind")?;
    let total: Option<i64> = row.try_get("total")?;

    Ok(ImportProgress {
        status: status.parse::<ImportStatus>().map_err(Error::Internal)?,
        session_id: parse_uuid(row.try_get("session_id")?)?,
        source_kind: source_kind
            .map(|k| k.parse::<SourceKind>())
            .transpose()
            .map_err(Error::Internal)?,
        processed: row.try_get::<i64, _>("processed")?.max(0) as u64,
        total: total.map(|t| t.max(0) as u64),
        percent: row.try_get("percent")?,
        imported: row.try_get::<i64, _>("imported")?.max(0) as u64,
        failed_rows: row.try_get::<i64, _>("failed_rows")?.max(0) as u64,
        started_at: parse_timestamp(row.try_get("started_at")?)?,
        updated_at: parse_timestamp(row.try_get("updated_at")?)?.unwrap_or_else(chrono::Utc::now),
        ended_at: parse_timestamp(row.try_get("ended_at")?)?,
        last_error: row.try_get("last_error")?,
    })
}
