//! Default record sink: writes mapped rows into `imported_records`

use chrono::Utc;
use importd_common::ImportConfig;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::ImportError;
use crate::types::{RecordSink, RowOutcome, SourceRecord};

/// Build the stored JSON document for one record
///
/// With mapping rules, each rule copies a source column into a target field
/// and a missing column rejects the row. Without rules, header columns are
/// kept as-is (or the raw values when the source has no header).
pub fn map_record(config: &ImportConfig, record: &SourceRecord) -> Result<Value, String> {
    if record.values.iter().all(|v| v.is_empty()) {
        return Err("empty row".to_string());
    }

    if !config.mappings.is_empty() {
        let mut doc = Map::new();
        for mapping in &config.mappings {
            let value = record
                .get(&mapping.column)
                .ok_or_else(|| format!("column '{}' missing", mapping.column))?;
            doc.insert(mapping.field.clone(), Value::String(value.to_string()));
        }
        return Ok(Value::Object(doc));
    }

    match &record.columns {
        Some(columns) => {
            if record.values.len() != columns.len() {
                return Err(format!(
                    "expected {} columns, found {}",
                    columns.len(),
                    record.values.len()
                ));
            }
            let doc = columns
                .iter()
                .zip(&record.values)
                .map(|(c, v)| (c.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>();
            Ok(Value::Object(doc))
        }
        None => Ok(Value::Array(
            record.values.iter().cloned().map(Value::String).collect(),
        )),
    }
}

/// Writes each accepted batch in one transaction
pub struct SqliteRecordSink {
    db: SqlitePool,
}

impl SqliteRecordSink {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl RecordSink for SqliteRecordSink {
    async fn write_batch(
        &self,
        session_id: Uuid,
        config: &ImportConfig,
        records: &[SourceRecord],
    ) -> Result<Vec<RowOutcome>, ImportError> {
        let mut outcomes = Vec::with_capacity(records.len());
        let now = Utc::now().to_rfc3339();
        let session = session_id.to_string();

        let sink_fault = |e: sqlx::Error| ImportError::FatalRun(format!("Sink write failed: {}", e));
        let mut tx = self.db.begin().await.map_err(sink_fault)?;

        for record in records {
            match map_record(config, record) {
                Ok(doc) => {
                    sqlx::query(
                        "INSERT INTO imported_records (session_id, row_number, data, imported_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&session)
                    .bind(record.row_number as i64)
                    .bind(doc.to_string())
                    .bind(&now)
                    .execute(&mut *tx)
                    .await
                    .map_err(sink_fault)?;
                    outcomes.push(RowOutcome::Imported);
                }
                Err(reason) => outcomes.push(RowOutcome::Rejected(reason)),
            }
        }

        tx.commit().await.map_err(sink_fault)?;
        Ok(outcomes)
    }
}
