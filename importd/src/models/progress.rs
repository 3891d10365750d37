//! Run state machine records
//!
//! idle → validating → processing → {completed, failed, cancelled}
//!
//! `ImportProgress` persists past the terminal state until the next run
//! overwrites it, so dashboards can show the last outcome.

use chrono::{DateTime, Utc};
use importd_common::SourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// No run, or progress cleared by an emergency reset
    Idle,
    /// Lock acquired, checking configuration and source
    Validating,
    /// Streaming batches
    Processing,
    /// Source exhausted
    Completed,
    /// Validation failure, fatal fault or row-failure threshold
    Failed,
    /// Cancellation observed at a batch boundary
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Idle => "idle",
            ImportStatus::Validating => "validating",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
        }
    }

    /// A run owns the lock in this state
    pub fn is_active(&self) -> bool {
        matches!(self, ImportStatus::Validating | ImportStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Failed | ImportStatus::Cancelled
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ImportStatus::Idle),
            "validating" => Ok(ImportStatus::Validating),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            "cancelled" => Ok(ImportStatus::Cancelled),
            other => Err(format!("Unknown import status: {}", other)),
        }
    }
}

/// Progress record of the current or most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub status: ImportStatus,
    pub session_id: Option<Uuid>,
    pub source_kind: Option<SourceKind>,
    /// Records read from the source so far
    pub processed: u64,
    /// Total records, when the source can tell
    pub total: Option<u64>,
    /// 0.0 - 100.0
    pub percent: f64,
    /// Records the sink accepted
    pub imported: u64,
    pub failed_rows: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ImportProgress {
    fn default() -> Self {
        Self::idle()
    }
}

impl ImportProgress {
    pub fn idle() -> Self {
        Self {
            status: ImportStatus::Idle,
            session_id: None,
            source_kind: None,
            processed: 0,
            total: None,
            percent: 0.0,
            imported: 0,
            failed_rows: 0,
            started_at: None,
            updated_at: Utc::now(),
            ended_at: None,
            last_error: None,
        }
    }

    /// Fresh record for a run that just acquired the lock
    pub fn validating(session_id: Uuid, source_kind: SourceKind) -> Self {
        let now = Utc::now();
        Self {
            status: ImportStatus::Validating,
            session_id: Some(session_id),
            source_kind: Some(source_kind),
            started_at: Some(now),
            updated_at: now,
            ..Self::idle()
        }
    }

    /// Record counters after a batch
    ///
    /// `percent` never decreases for the session even if the source revises
    /// its total upward.
    pub fn advance(&mut self, processed: u64, total: Option<u64>, imported: u64, failed_rows: u64) {
        self.processed = processed;
        // processed ≤ total whenever total is known
        self.total = total.map(|t| t.max(processed));
        self.imported = imported;
        self.failed_rows = failed_rows;
        self.percent = self.percent.max(compute_percent(self.processed, self.total));
        self.updated_at = Utc::now();
    }

    /// Move to a terminal state
    pub fn finish(&mut self, status: ImportStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        if status == ImportStatus::Completed {
            self.percent = 100.0;
            // A source without a length hint is fully counted once exhausted
            self.total = Some(self.total.unwrap_or(self.processed).max(self.processed));
        }
        if error.is_some() {
            self.last_error = error;
        }
        self.updated_at = now;
        self.ended_at = Some(now);
    }

    /// Seconds from start to end (or now)
    pub fn elapsed_seconds(&self) -> u64 {
        match self.started_at {
            Some(started) => {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(started).num_seconds().max(0) as u64
            }
            None => 0,
        }
    }
}

/// Percentage complete, 0 when the total is unknown or zero
pub fn compute_percent(processed: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => ((processed as f64 / total as f64) * 100.0).min(100.0),
        _ => 0.0,
    }
}

/// Singleton run lock
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLock {
    pub held: bool,
    pub session_id: Option<Uuid>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Persisted cooperative cancellation flag
    pub cancel_requested: bool,
}

impl RunLock {
    pub fn is_held_by(&self, session_id: Uuid) -> bool {
        self.held && self.session_id == Some(session_id)
    }

    /// Seconds since the last heartbeat, if held
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.held {
            return None;
        }
        self.heartbeat_at
            .or(self.acquired_at)
            .map(|hb| now.signed_duration_since(hb).num_seconds())
    }

    /// Held and silent for longer than `threshold_secs`
    pub fn is_stuck(&self, now: DateTime<Utc>, threshold_secs: u64) -> bool {
        match self.heartbeat_age_secs(now) {
            Some(age) => age > threshold_secs as i64,
            // Held without any timestamp can never heartbeat
            None => self.held,
        }
    }
}
