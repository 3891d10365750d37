//! Historical counters, updated only on terminal transitions

use chrono::{DateTime, Utc};
use importd_common::SourceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportStats {
    /// Records imported across all runs
    pub total_imported: u64,
    /// End time of the most recent terminal run
    pub last_run: Option<DateTime<Utc>>,
    /// Records imported by the most recent terminal run
    pub last_count: u64,
    pub last_source: Option<SourceKind>,
}
