//! Settings database operations
//!
//! Key/value accessors for the `settings` table. The default import
//! configuration is stored as JSON under `import_config`.

use importd_common::{Error, ImportConfig, Result};
use sqlx::{Pool, Sqlite};

const IMPORT_CONFIG_KEY: &str = "import_config";

/// Load the stored default import configuration, if any
pub async fn load_import_config(db: &Pool<Sqlite>) -> Result<Option<ImportConfig>> {
    let raw: Option<String> = get_setting(db, IMPORT_CONFIG_KEY).await?;
    raw.map(|json| {
        serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("Stored import config is invalid: {}", e)))
    })
    .transpose()
}

/// Persist the default import configuration
pub async fn save_import_config(db: &Pool<Sqlite>, config: &ImportConfig) -> Result<()> {
    let json = serde_json::to_string(config)
        .map_err(|e| Error::Internal(format!("Serialize import config failed: {}", e)))?;
    set_setting(db, IMPORT_CONFIG_KEY, json).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
