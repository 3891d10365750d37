//! Collaborator contracts for the coordination layer
//!
//! The coordinator never parses records or writes content itself. It drives
//! three injected collaborators:
//! - **`SourceOpener` / `RecordSource`**: yields records in batches
//! - **`RecordSink`**: writes a batch, reporting a per-row outcome
//! - **`MaintenanceHooks`**: temp-file and dead-process cleanup
//!
//! All collaborators are supplied to `Coordinator::builder()`; a missing one
//! is an activation error at startup, never a per-call availability probe.
//!
//! # Example
//! ```rust,ignore
//! use importd::types::{RecordSink, RowOutcome, SourceRecord};
//!
//! struct CountingSink;
//!
//! #[async_trait::async_trait]
//! impl RecordSink for CountingSink {
//!     async fn write_batch(&self, _session_id: Uuid, _config: &ImportConfig, records: &[SourceRecord])
//!         -> Result<Vec<RowOutcome>, ImportError>
//!     {
//!         Ok(records.iter().map(|_| RowOutcome::Imported).collect())
//!     }
//! }
//! ```

use importd_common::{ImportConfig, SourceKind};
use uuid::Uuid;

use crate::error::ImportError;

/// One record read from a source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// 1-based data row number (header excluded)
    pub row_number: u64,
    /// Column values in source order
    pub values: Vec<String>,
    /// Header names, when the source has a header row
    pub columns: Option<std::sync::Arc<Vec<String>>>,
}

impl SourceRecord {
    /// Value of the named column, if the source has a header
    pub fn get(&self, column: &str) -> Option<&str> {
        let columns = self.columns.as_ref()?;
        let index = columns.iter().position(|c| c == column)?;
        self.values.get(index).map(String::as_str)
    }
}

/// Per-row result reported by a sink
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Imported,
    /// Row rejected; counted toward the failure thresholds
    Rejected(String),
}

/// Opened source, read incrementally
#[async_trait::async_trait]
pub trait RecordSource: Send {
    /// Total record count when known up front
    fn total_hint(&self) -> Option<u64>;

    /// Read up to `max` records; an empty batch means the source is exhausted
    ///
    /// # Errors
    /// `FatalRun` when the source breaks mid-read
    async fn next_batch(&mut self, max: usize) -> Result<Vec<SourceRecord>, ImportError>;
}

/// Opens a source for one run
#[async_trait::async_trait]
pub trait SourceOpener: Send + Sync {
    /// # Errors
    /// `SourceUnavailable` when the location cannot be reached or read
    async fn open(
        &self,
        kind: SourceKind,
        config: &ImportConfig,
    ) -> Result<Box<dyn RecordSource>, ImportError>;
}

/// Content store writer
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Write a batch; returns one outcome per record, in order
    ///
    /// # Errors
    /// Any `Err` is a sink-level fault and fails the run
    async fn write_batch(
        &self,
        session_id: Uuid,
        config: &ImportConfig,
        records: &[SourceRecord],
    ) -> Result<Vec<RowOutcome>, ImportError>;
}

/// Cleanup collaborator used by maintenance ticks and emergency reset
#[async_trait::async_trait]
pub trait MaintenanceHooks: Send + Sync {
    /// Remove leftover temp files; returns the number removed
    async fn cleanup_temp_files(&self) -> Result<u64, ImportError>;

    /// Clear bookkeeping for runs whose process is gone; returns entries cleared
    async fn cleanup_dead_processes(&self) -> Result<u64, ImportError>;
}
