//! Recurring triggers
//!
//! The scheduler owns `ScheduleEntry` records and exposes a single
//! `on_tick(cadence_id)` entry point; what drives it (the built-in interval
//! timer, an HTTP call from cron, the CLI) does not matter. It never looks
//! at the run lock: whether an import may run is decided solely by
//! `Controller::start`.
//!
//! A due tick always moves `next_run_at` to the first cadence boundary after
//! `now`, whether the run started, was skipped or failed. Missed ticks are
//! neither queued nor replayed.

use chrono::{DateTime, Utc};
use importd_common::events::{EventBus, ImportEvent};
use importd_common::{ImportConfig, SourceKind};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::error::ImportError;
use crate::models::{ScheduleAction, ScheduleEntry, TickOutcome};
use crate::services::controller::Controller;
use crate::types::MaintenanceHooks;

#[derive(Clone)]
pub struct Scheduler {
    db: SqlitePool,
    controller: Controller,
    maintenance: Arc<dyn MaintenanceHooks>,
    event_bus: EventBus,
    /// Used when no import config has been stored yet
    fallback_config: ImportConfig,
}

impl Scheduler {
    pub fn new(
        db: SqlitePool,
        controller: Controller,
        maintenance: Arc<dyn MaintenanceHooks>,
        event_bus: EventBus,
        fallback_config: ImportConfig,
    ) -> Self {
        Self {
            db,
            controller,
            maintenance,
            event_bus,
            fallback_config,
        }
    }

    /// Persisted default import config, or the file/compiled default
    pub async fn default_config(&self) -> Result<ImportConfig, ImportError> {
        Ok(db::settings::load_import_config(&self.db)
            .await?
            .unwrap_or_else(|| self.fallback_config.clone()))
    }

    /// Register `cadence_id` unless it already exists; true if registered
    ///
    /// The first run is due one interval from now.
    pub async fn ensure_scheduled(
        &self,
        cadence_id: &str,
        interval_secs: i64,
        action: ScheduleAction,
        source_kind: Option<SourceKind>,
    ) -> Result<bool, ImportError> {
        if interval_secs <= 0 {
            return Err(ImportError::Config(format!(
                "Cadence {} needs a positive interval",
                cadence_id
            )));
        }

        let entry = ScheduleEntry {
            cadence_id: cadence_id.to_string(),
            interval_secs,
            next_run_at: Utc::now() + chrono::Duration::seconds(interval_secs),
            action,
            source_kind,
            enabled: true,
        };

        let inserted = db::schedule::insert_if_absent(&self.db, &entry).await?;
        if inserted {
            info!(
                cadence_id,
                interval_secs,
                action = %action,
                next_run_at = %entry.next_run_at,
                "Cadence registered"
            );
        }
        Ok(inserted)
    }

    /// Create or replace an entry
    pub async fn schedule(&self, entry: ScheduleEntry) -> Result<(), ImportError> {
        if entry.interval_secs <= 0 {
            return Err(ImportError::Config(format!(
                "Cadence {} needs a positive interval",
                entry.cadence_id
            )));
        }
        db::schedule::upsert(&self.db, &entry).await?;
        Ok(())
    }

    /// Remove an entry; true if it existed
    pub async fn unschedule(&self, cadence_id: &str) -> Result<bool, ImportError> {
        let removed = db::schedule::delete(&self.db, cadence_id).await?;
        if removed {
            info!(cadence_id, "Cadence removed");
        }
        Ok(removed)
    }

    pub async fn entries(&self) -> Result<Vec<ScheduleEntry>, ImportError> {
        Ok(db::schedule::list(&self.db).await?)
    }

    pub async fn next_scheduled(&self, cadence_id: &str) -> Result<Option<DateTime<Utc>>, ImportError> {
        Ok(db::schedule::load(&self.db, cadence_id)
            .await?
            .map(|e| e.next_run_at))
    }

    pub async fn on_tick(&self, cadence_id: &str) -> Result<TickOutcome, ImportError> {
        self.on_tick_at(cadence_id, Utc::now()).await
    }

    /// Evaluate `cadence_id` as of `now`
    ///
    /// # Errors
    /// `Config` for an unknown cadence; store failures
    pub async fn on_tick_at(&self, cadence_id: &str, now: DateTime<Utc>) -> Result<TickOutcome, ImportError> {
        let entry = db::schedule::load(&self.db, cadence_id)
            .await?
            .ok_or_else(|| ImportError::Config(format!("Unknown cadence: {}", cadence_id)))?;

        if !entry.is_due(now) {
            debug!(cadence_id, next_run_at = %entry.next_run_at, "Tick not due");
            return Ok(TickOutcome::NotDue {
                next_run_at: entry.next_run_at,
            });
        }

        // Advance before acting so a crash mid-run never replays this tick.
        // Only the tick that wins the compare-and-set acts on the boundary.
        let next_run_at = entry.next_boundary_after(now);
        let claimed =
            db::schedule::advance_next_run(&self.db, cadence_id, entry.next_run_at, next_run_at)
                .await?;
        if !claimed {
            let current = db::schedule::load(&self.db, cadence_id)
                .await?
                .map(|e| e.next_run_at)
                .unwrap_or(next_run_at);
            debug!(cadence_id, next_run_at = %current, "Boundary already claimed by another tick");
            return Ok(TickOutcome::NotDue {
                next_run_at: current,
            });
        }

        let outcome = match entry.action {
            ScheduleAction::Import => self.run_import(&entry, next_run_at).await,
            ScheduleAction::Maintenance => self.run_maintenance(cadence_id, next_run_at).await,
        };

        Ok(outcome)
    }

    async fn run_import(&self, entry: &ScheduleEntry, next_run_at: DateTime<Utc>) -> TickOutcome {
        let config = match self.default_config().await {
            Ok(config) => config,
            Err(e) => {
                error!(cadence_id = %entry.cadence_id, error = %e, "Scheduled import has no usable config");
                return TickOutcome::Failed {
                    message: e.to_string(),
                    next_run_at,
                };
            }
        };

        let source_kind = entry.source_kind.unwrap_or(config.source_kind);
        let trigger = format!("scheduler:{}", entry.cadence_id);

        match self.controller.start(source_kind, config, &trigger).await {
            Ok(handle) => {
                info!(
                    cadence_id = %entry.cadence_id,
                    session_id = %handle.session_id,
                    next_run_at = %next_run_at,
                    "Scheduled import started"
                );
                TickOutcome::Started {
                    session_id: handle.session_id,
                    next_run_at,
                }
            }
            Err(ImportError::LockContention { .. }) => {
                info!(
                    cadence_id = %entry.cadence_id,
                    next_run_at = %next_run_at,
                    "Scheduled import skipped: another run is active"
                );
                self.event_bus.emit_lossy(ImportEvent::TickSkipped {
                    cadence_id: entry.cadence_id.clone(),
                    next_run_at,
                    timestamp: Utc::now(),
                });
                TickOutcome::Skipped { next_run_at }
            }
            Err(e) => {
                warn!(cadence_id = %entry.cadence_id, error = %e, "Scheduled import rejected");
                TickOutcome::Failed {
                    message: e.to_string(),
                    next_run_at,
                }
            }
        }
    }

    async fn run_maintenance(&self, cadence_id: &str, next_run_at: DateTime<Utc>) -> TickOutcome {
        let result = async {
            let removed = self.maintenance.cleanup_temp_files().await?;
            self.maintenance.cleanup_dead_processes().await?;
            Ok::<u64, ImportError>(removed)
        }
        .await;

        match result {
            Ok(removed_files) => {
                info!(cadence_id, removed_files, "Maintenance completed");
                TickOutcome::Maintained {
                    removed_files,
                    next_run_at,
                }
            }
            Err(e) => {
                error!(cadence_id, error = %e, "Maintenance failed");
                TickOutcome::Failed {
                    message: e.to_string(),
                    next_run_at,
                }
            }
        }
    }

    /// Tick every registered cadence as of `now`
    ///
    /// A failing cadence is logged and does not stop the others.
    pub async fn tick_all(&self, now: DateTime<Utc>) -> Vec<(String, TickOutcome)> {
        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to load schedule");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::new();
        for entry in entries {
            match self.on_tick_at(&entry.cadence_id, now).await {
                Ok(outcome) => outcomes.push((entry.cadence_id, outcome)),
                Err(e) => error!(cadence_id = %entry.cadence_id, error = %e, "Tick failed"),
            }
        }
        outcomes
    }
}
