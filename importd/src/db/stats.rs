//! Historical counters kept in the `settings` table

use importd_common::{Error, Result, SourceKind};
use sqlx::SqlitePool;

use super::{format_timestamp, parse_timestamp};
use crate::models::{ImportProgress, ImportStats};

const TOTAL_IMPORTED: &str = "total_imported";
const LAST_RUN: &str = "last_run";
const LAST_COUNT: &str = "last_count";
const LAST_SOURCE: &str = "last_source";

/// Fold a terminal progress record into the counters (single transaction)
pub async fn record_terminal(db: &SqlitePool, progress: &ImportProgress) -> Result<()> {
    let mut tx = db.begin().await?;

    let current: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(TOTAL_IMPORTED)
        .fetch_optional(&mut *tx)
        .await?;
    let total = current
        .and_then(|(v,)| v.parse::<u64>().ok())
        .unwrap_or(0)
        .saturating_add(progress.imported);

    let ended = progress.ended_at.unwrap_or(progress.updated_at);
    let mut pairs = vec![
        (TOTAL_IMPORTED, total.to_string()),
        (LAST_RUN, format_timestamp(ended)),
        (LAST_COUNT, progress.imported.to_string()),
    ];
    if let Some(kind) = progress.source_kind {
        pairs.push((LAST_SOURCE, kind.as_str().to_string()));
    }

    for (key, value) in pairs {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn load(db: &SqlitePool) -> Result<ImportStats> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT key, value FROM settings WHERE key IN ('total_imported', 'last_run', 'last_count', 'last_source')",
    )
    .fetch_all(db)
    .await?;

    let mut stats = ImportStats::default();
    for (key, value) in rows {
        match key.as_str() {
            TOTAL_IMPORTED => {
                stats.total_imported = value
                    .parse()
                    .map_err(|e| Error::Internal(format!("Invalid total_imported: {}", e)))?
            }
            LAST_RUN => stats.last_run = parse_timestamp(Some(value))?,
            LAST_COUNT => {
                stats.last_count = value
                    .parse()
                    .map_err(|e| Error::Internal(format!("Invalid last_count: {}", e)))?
            }
            LAST_SOURCE => stats.last_source = value.parse::<SourceKind>().ok(),
            _ => {}
        }
    }

    Ok(stats)
}
