//! Data models for importd

pub mod health;
pub mod progress;
pub mod schedule;
pub mod stats;

pub use health::{HealthCheck, HealthCheckResult};
pub use progress::{compute_percent, ImportProgress, ImportStatus, RunLock};
pub use schedule::{cadence_interval, ScheduleAction, ScheduleEntry, TickOutcome};
pub use stats::ImportStats;
