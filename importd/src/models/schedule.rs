//! Recurring trigger records

use chrono::{DateTime, Utc};
use importd_common::SourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const HOURLY_SECS: i64 = 3_600;
pub const TWICE_DAILY_SECS: i64 = 43_200;
pub const DAILY_SECS: i64 = 86_400;
pub const WEEKLY_SECS: i64 = 604_800;

/// Interval for a named cadence ("hourly", "twicedaily", "daily", "weekly")
pub fn cadence_interval(name: &str) -> Option<i64> {
    match name.trim().to_ascii_lowercase().as_str() {
        "hourly" => Some(HOURLY_SECS),
        "twicedaily" => Some(TWICE_DAILY_SECS),
        "daily" => Some(DAILY_SECS),
        "weekly" => Some(WEEKLY_SECS),
        _ => None,
    }
}

/// What a due entry does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    /// Start an import with the stored default config
    Import,
    /// Temp file and dead-process cleanup
    Maintenance,
}

impl ScheduleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleAction::Import => "import",
            ScheduleAction::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(ScheduleAction::Import),
            "maintenance" => Ok(ScheduleAction::Maintenance),
            other => Err(format!("Unknown schedule action: {}", other)),
        }
    }
}

/// One recurring cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub cadence_id: String,
    pub interval_secs: i64,
    pub next_run_at: DateTime<Utc>,
    pub action: ScheduleAction,
    /// Source for import entries; None uses the config's default source
    pub source_kind: Option<SourceKind>,
    pub enabled: bool,
}

impl ScheduleEntry {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_run_at
    }

    /// First cadence boundary strictly after `now`
    ///
    /// Boundaries are `next_run_at + k * interval`; missed boundaries are
    /// skipped rather than replayed.
    pub fn next_boundary_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = self.interval_secs.max(1);
        if now < self.next_run_at {
            return self.next_run_at;
        }
        let behind = now.signed_duration_since(self.next_run_at).num_seconds();
        let steps = behind / interval + 1;
        self.next_run_at + chrono::Duration::seconds(steps * interval)
    }
}

/// Result of `Scheduler::on_tick`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// `now < next_run_at`
    NotDue { next_run_at: DateTime<Utc> },
    /// Import accepted by the controller
    Started {
        session_id: Uuid,
        next_run_at: DateTime<Utc>,
    },
    /// Another run held the lock
    Skipped { next_run_at: DateTime<Utc> },
    /// Import rejected (validation, source) or maintenance failed
    Failed {
        message: String,
        next_run_at: DateTime<Utc>,
    },
    /// Maintenance collaborator ran
    Maintained {
        removed_files: u64,
        next_run_at: DateTime<Utc>,
    },
}

impl TickOutcome {
    pub fn next_run_at(&self) -> DateTime<Utc> {
        match self {
            TickOutcome::NotDue { next_run_at }
            | TickOutcome::Started { next_run_at, .. }
            | TickOutcome::Skipped { next_run_at }
            | TickOutcome::Failed { next_run_at, .. }
            | TickOutcome::Maintained { next_run_at, .. } => *next_run_at,
        }
    }
}
