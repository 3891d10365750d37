//! Coordinator assembly
//!
//! Wires the controller, scheduler and health monitor around one set of
//! collaborators. Every collaborator must be supplied explicitly; `build`
//! fails with `ImportError::Activation` naming what is missing instead of
//! falling back to a silent default.

use importd_common::events::EventBus;
use importd_common::ImportConfig;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ImportError;
use crate::models::HealthCheckResult;
use crate::services::controller::Controller;
use crate::services::health_monitor::HealthMonitor;
use crate::services::recovery::{self, ResetReport};
use crate::services::scheduler::Scheduler;
use crate::services::validator::Validator;
use crate::store::CoordinationStore;
use crate::types::{MaintenanceHooks, RecordSink, SourceOpener};

/// Default stuck threshold, in seconds
pub const DEFAULT_STUCK_THRESHOLD_SECS: u64 = 300;

/// Assembled coordination services
#[derive(Clone)]
pub struct Coordinator {
    pub controller: Controller,
    pub scheduler: Scheduler,
    pub health: Arc<HealthMonitor>,
    pub maintenance: Arc<dyn MaintenanceHooks>,
    pub validator: Validator,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Stored default config, falling back to the file default
    pub async fn current_config(&self) -> Result<ImportConfig, ImportError> {
        self.scheduler.default_config().await
    }

    pub async fn check_health(&self) -> Result<HealthCheckResult, ImportError> {
        let config = self.current_config().await?;
        self.health.check(&config).await
    }

    /// Health check, then emergency reset with its classification
    pub async fn emergency_reset(&self, confirmed: bool) -> Result<ResetReport, ImportError> {
        if !confirmed {
            return recovery::emergency_reset(&self.controller, &self.maintenance, None, false).await;
        }
        let health = self.check_health().await.ok();
        recovery::emergency_reset(&self.controller, &self.maintenance, health.as_ref(), true).await
    }
}

#[derive(Default)]
pub struct CoordinatorBuilder {
    db: Option<SqlitePool>,
    store: Option<Arc<dyn CoordinationStore>>,
    validator: Option<Validator>,
    sources: Option<Arc<dyn SourceOpener>>,
    sink: Option<Arc<dyn RecordSink>>,
    maintenance: Option<Arc<dyn MaintenanceHooks>>,
    event_bus: Option<EventBus>,
    data_dir: Option<PathBuf>,
    stuck_threshold_secs: Option<u64>,
    open_heartbeat_interval: Option<Duration>,
    resource_minimums: Option<(u64, u64)>,
    fallback_config: Option<ImportConfig>,
}

impl CoordinatorBuilder {
    pub fn db(mut self, db: SqlitePool) -> Self {
        self.db = Some(db);
        self
    }

    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn sources(mut self, sources: Arc<dyn SourceOpener>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn maintenance(mut self, maintenance: Arc<dyn MaintenanceHooks>) -> Self {
        self.maintenance = Some(maintenance);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Folder probed by the health monitor's permission and disk checks
    pub fn data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    pub fn stuck_threshold_secs(mut self, secs: u64) -> Self {
        self.stuck_threshold_secs = Some(secs);
        self
    }

    /// Heartbeat period while a source opens; defaults to a fifth of the
    /// stuck threshold
    pub fn open_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.open_heartbeat_interval = Some(interval);
        self
    }

    pub fn resource_minimums(mut self, min_free_disk_mb: u64, min_available_memory_mb: u64) -> Self {
        self.resource_minimums = Some((min_free_disk_mb, min_available_memory_mb));
        self
    }

    pub fn fallback_config(mut self, config: ImportConfig) -> Self {
        self.fallback_config = Some(config);
        self
    }

    /// # Errors
    /// `Activation` listing every missing collaborator
    pub fn build(self) -> Result<Coordinator, ImportError> {
        let mut missing = Vec::new();
        if self.db.is_none() {
            missing.push("database pool");
        }
        if self.store.is_none() {
            missing.push("coordination store");
        }
        if self.validator.is_none() {
            missing.push("validator");
        }
        if self.sources.is_none() {
            missing.push("source opener");
        }
        if self.sink.is_none() {
            missing.push("record sink");
        }
        if self.maintenance.is_none() {
            missing.push("maintenance hooks");
        }
        if self.event_bus.is_none() {
            missing.push("event bus");
        }
        if self.data_dir.is_none() {
            missing.push("data folder");
        }

        let (
            Some(db),
            Some(store),
            Some(validator),
            Some(sources),
            Some(sink),
            Some(maintenance),
            Some(event_bus),
            Some(data_dir),
        ) = (
            self.db,
            self.store,
            self.validator,
            self.sources,
            self.sink,
            self.maintenance,
            self.event_bus,
            self.data_dir,
        )
        else {
            return Err(ImportError::Activation(format!(
                "missing collaborator(s): {}",
                missing.join(", ")
            )));
        };

        let stuck_threshold_secs = self.stuck_threshold_secs.unwrap_or(DEFAULT_STUCK_THRESHOLD_SECS);
        let open_heartbeat_interval = self
            .open_heartbeat_interval
            .unwrap_or_else(|| Duration::from_secs((stuck_threshold_secs / 5).clamp(1, 30)));

        let controller = Controller::new(
            store.clone(),
            validator.clone(),
            sources,
            sink,
            event_bus.clone(),
        )
        .with_open_heartbeat_interval(open_heartbeat_interval);

        let scheduler = Scheduler::new(
            db,
            controller.clone(),
            maintenance.clone(),
            event_bus,
            self.fallback_config.unwrap_or_default(),
        );

        let mut health = HealthMonitor::new(
            store,
            data_dir,
            stuck_threshold_secs,
        );
        if let Some((disk_mb, memory_mb)) = self.resource_minimums {
            health = health.with_resource_minimums(disk_mb, memory_mb);
        }

        Ok(Coordinator {
            controller,
            scheduler,
            health: Arc::new(health),
            maintenance,
            validator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_collaborators_fail_activation() {
        let result = Coordinator::builder()
            .validator(Validator::new(reqwest::Client::new()))
            .event_bus(EventBus::new(16))
            .build();

        match result {
            Err(ImportError::Activation(message)) => {
                assert!(message.contains("coordination store"));
                assert!(message.contains("record sink"));
                assert!(!message.contains("validator"));
            }
            Err(other) => panic!("expected activation error, got {other}"),
            Ok(_) => panic!("expected activation error"),
        }
    }
}
