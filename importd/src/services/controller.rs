//! Import run controller
//!
//! State machine: idle → validating → processing → {completed, failed, cancelled}
//!
//! `start` acquires the lock, validates and hands the run to a background
//! batch loop. The loop is the only writer of progress, heartbeat and
//! release for its session. Cancellation is cooperative: the loop checks the
//! in-process token and the persisted flag between batches, never mid-batch.
//! Every terminal transition writes the terminal record, folds it into the
//! historical counters and releases the lock.

use chrono::Utc;
use importd_common::events::{EventBus, ImportEvent};
use importd_common::{ImportConfig, SourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::models::{ImportProgress, ImportStatus};
use crate::services::validator::Validator;
use crate::store::CoordinationStore;
use crate::types::{RecordSink, RowOutcome, SourceOpener};

/// Handle to an accepted run
#[derive(Debug)]
pub struct RunHandle {
    pub session_id: Uuid,
    done: oneshot::Receiver<Result<ImportProgress, ImportError>>,
}

impl RunHandle {
    /// Wait for the terminal progress record
    ///
    /// # Errors
    /// `FatalRun` when the lock was taken away by an emergency reset or the
    /// run task ended without reporting.
    pub async fn wait(self) -> Result<ImportProgress, ImportError> {
        self.done
            .await
            .unwrap_or_else(|_| Err(ImportError::FatalRun("run task ended unexpectedly".to_string())))
    }
}

/// Coordinates import runs
#[derive(Clone)]
pub struct Controller {
    store: Arc<dyn CoordinationStore>,
    validator: Validator,
    sources: Arc<dyn SourceOpener>,
    sink: Arc<dyn RecordSink>,
    event_bus: EventBus,
    /// Cancellation tokens for runs owned by this process
    cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Heartbeat period while the source is being opened or downloaded
    open_heartbeat_interval: Duration,
}

impl Controller {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        validator: Validator,
        sources: Arc<dyn SourceOpener>,
        sink: Arc<dyn RecordSink>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            validator,
            sources,
            sink,
            event_bus,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            open_heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Heartbeat period while opening a source; keep it well under the
    /// stuck threshold
    pub fn with_open_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.open_heartbeat_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Start a run reading from `source_kind`
    ///
    /// Returns once validation passed and the batch loop is running.
    ///
    /// # Errors
    /// - `LockContention` when another run holds the lock (no side effects)
    /// - `Validation` / `SourceUnavailable` after the run was recorded as
    ///   failed and the lock released
    pub async fn start(
        &self,
        source_kind: SourceKind,
        config: ImportConfig,
        trigger: &str,
    ) -> Result<RunHandle, ImportError> {
        let session_id = Uuid::new_v4();

        if !self.store.acquire(session_id).await? {
            let holder = self.store.read_lock().await.ok().and_then(|l| l.session_id);
            info!(
                trigger,
                holder = ?holder,
                "Import rejected: another run holds the lock"
            );
            return Err(ImportError::LockContention { holder });
        }

        let progress = ImportProgress::validating(session_id, source_kind);
        if let Err(e) = self.store.write_progress(&progress).await {
            self.release_quietly(session_id).await;
            return Err(e.into());
        }

        info!(
            session_id = %session_id,
            source_kind = %source_kind,
            trigger,
            "Import run started"
        );
        self.event_bus.emit_lossy(ImportEvent::RunStarted {
            session_id,
            source_kind,
            trigger: trigger.to_string(),
            timestamp: Utc::now(),
        });

        let report = self.validator.validate_config_for(source_kind, &config).await;
        let validated = if report.valid {
            self.validator.probe(source_kind, &config).await
        } else {
            Err(ImportError::Validation(report.errors))
        };

        if let Err(e) = validated {
            warn!(session_id = %session_id, error = %e, "Import validation failed");
            if let Err(finish_err) = self.finish(progress, ImportStatus::Failed, Some(e.to_string())).await {
                warn!(session_id = %session_id, error = %finish_err, "Failed to record validation failure");
            }
            return Err(e);
        }

        let mut progress = progress;
        progress.status = ImportStatus::Processing;
        progress.updated_at = Utc::now();
        match self.store.write_progress(&progress).await {
            Ok(true) => {}
            Ok(false) => return Err(ImportError::FatalRun("lock lost during validation".to_string())),
            Err(e) => {
                let err = ImportError::from(e);
                if let Err(finish_err) = self.finish(progress, ImportStatus::Failed, Some(err.to_string())).await {
                    warn!(session_id = %session_id, error = %finish_err, "Failed to record start failure");
                }
                return Err(err);
            }
        }

        let token = CancellationToken::new();
        self.cancellation_tokens
            .write()
            .await
            .insert(session_id, token.clone());

        let (tx, rx) = oneshot::channel();
        let controller = self.clone();
        tokio::spawn(async move {
            debug!(session_id = %session_id, "Batch loop task started");
            let result = controller
                .run_batches(progress, source_kind, config, token)
                .await;
            let _ = tx.send(result);
        });

        Ok(RunHandle {
            session_id,
            done: rx,
        })
    }

    async fn run_batches(
        &self,
        mut progress: ImportProgress,
        source_kind: SourceKind,
        config: ImportConfig,
        token: CancellationToken,
    ) -> Result<ImportProgress, ImportError> {
        let session_id = progress.session_id.unwrap_or_default();

        // Opening may download the whole source; keep the lock alive meanwhile
        let opened = {
            let open = self.sources.open(source_kind, &config);
            tokio::pin!(open);
            let mut ticker = tokio::time::interval(self.open_heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    result = &mut open => break Some(result),
                    _ = token.cancelled() => break None,
                    _ = ticker.tick() => match self.store.heartbeat(session_id).await {
                        Ok(true) => debug!(session_id = %session_id, "Heartbeat while opening source"),
                        Ok(false) => return self.lock_lost(session_id).await,
                        Err(e) => warn!(session_id = %session_id, error = %e, "Heartbeat failed while opening source"),
                    },
                }
            }
        };

        let mut source = match opened {
            Some(Ok(source)) => source,
            Some(Err(e)) => {
                error!(session_id = %session_id, error = %e, "Failed to open source");
                return self.finish(progress, ImportStatus::Failed, Some(e.to_string())).await;
            }
            None => {
                info!(session_id = %session_id, "Cancelled while opening source");
                return self.finish(progress, ImportStatus::Cancelled, None).await;
            }
        };

        match self.store.heartbeat(session_id).await {
            Ok(true) => {}
            Ok(false) => return self.lock_lost(session_id).await,
            Err(e) => return self.store_failure(progress, e).await,
        }

        progress.advance(0, source.total_hint(), 0, 0);
        match self.store.write_progress(&progress).await {
            Ok(true) => {}
            Ok(false) => return self.lock_lost(session_id).await,
            Err(e) => return self.store_failure(progress, e).await,
        }

        let mut processed = 0u64;
        let mut imported = 0u64;
        let mut failed_rows = 0u64;
        let mut consecutive_failures = 0u64;

        loop {
            // Batch boundary: the only place a run can be cancelled
            let cancel_flag = match self.store.cancel_requested(session_id).await {
                Ok(flag) => flag,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to read cancellation flag");
                    false
                }
            };
            if token.is_cancelled() || cancel_flag {
                info!(session_id = %session_id, processed, "Cancellation observed at batch boundary");
                return self.finish(progress, ImportStatus::Cancelled, None).await;
            }

            let batch = match source.next_batch(config.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Source failed mid-run");
                    return self.finish(progress, ImportStatus::Failed, Some(e.to_string())).await;
                }
            };

            if batch.is_empty() {
                return self.finish(progress, ImportStatus::Completed, None).await;
            }

            let outcomes = match self.sink.write_batch(session_id, &config, &batch).await {
                Ok(outcomes) if outcomes.len() == batch.len() => outcomes,
                Ok(outcomes) => {
                    let err = ImportError::FatalRun(format!(
                        "sink reported {} outcomes for {} records",
                        outcomes.len(),
                        batch.len()
                    ));
                    return self.finish(progress, ImportStatus::Failed, Some(err.to_string())).await;
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Sink failed mid-run");
                    return self.finish(progress, ImportStatus::Failed, Some(e.to_string())).await;
                }
            };

            for (record, outcome) in batch.iter().zip(outcomes) {
                processed += 1;
                match outcome {
                    RowOutcome::Imported => {
                        imported += 1;
                        consecutive_failures = 0;
                    }
                    RowOutcome::Rejected(message) => {
                        failed_rows += 1;
                        consecutive_failures += 1;
                        let err = ImportError::RowProcessing {
                            row: record.row_number,
                            message,
                        };
                        warn!(session_id = %session_id, error = %err, "Row rejected");
                    }
                }
            }

            progress.advance(processed, source.total_hint(), imported, failed_rows);

            if failed_rows > config.row_failure_threshold
                || consecutive_failures > config.consecutive_failure_threshold
            {
                let message = format!(
                    "row failure threshold exceeded: {} failed rows ({} consecutive)",
                    failed_rows, consecutive_failures
                );
                error!(session_id = %session_id, failed_rows, consecutive_failures, "Row failure threshold exceeded");
                return self.finish(progress, ImportStatus::Failed, Some(message)).await;
            }

            match self.store.heartbeat(session_id).await {
                Ok(true) => {}
                Ok(false) => return self.lock_lost(session_id).await,
                Err(e) => return self.store_failure(progress, e).await,
            }
            match self.store.write_progress(&progress).await {
                Ok(true) => {}
                Ok(false) => return self.lock_lost(session_id).await,
                Err(e) => return self.store_failure(progress, e).await,
            }

            debug!(
                session_id = %session_id,
                processed,
                percent = progress.percent,
                "Batch committed"
            );
            self.event_bus.emit_lossy(ImportEvent::Progress {
                session_id,
                processed,
                total: progress.total,
                percent: progress.percent,
                failed_rows,
                timestamp: Utc::now(),
            });
        }
    }

    /// Terminal transition: record, counters, release, event
    ///
    /// Nothing is written when the session no longer holds the lock.
    async fn finish(
        &self,
        mut progress: ImportProgress,
        status: ImportStatus,
        error: Option<String>,
    ) -> Result<ImportProgress, ImportError> {
        let session_id = progress.session_id.unwrap_or_default();
        progress.finish(status, error);

        match self.store.write_progress(&progress).await {
            Ok(true) => {}
            Ok(false) => return self.lock_lost(session_id).await,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to write terminal progress");
            }
        }

        if let Err(e) = self.store.record_terminal(&progress).await {
            error!(session_id = %session_id, error = %e, "Failed to update import statistics");
        }

        self.release_quietly(session_id).await;
        self.cancellation_tokens.write().await.remove(&session_id);

        let now = Utc::now();
        let event = match status {
            ImportStatus::Completed => {
                info!(
                    session_id = %session_id,
                    imported = progress.imported,
                    failed_rows = progress.failed_rows,
                    "Import run completed"
                );
                ImportEvent::RunCompleted {
                    session_id,
                    imported: progress.imported,
                    failed_rows: progress.failed_rows,
                    duration_seconds: progress.elapsed_seconds(),
                    timestamp: now,
                }
            }
            ImportStatus::Cancelled => {
                info!(session_id = %session_id, processed = progress.processed, "Import run cancelled");
                ImportEvent::RunCancelled {
                    session_id,
                    processed: progress.processed,
                    timestamp: now,
                }
            }
            _ => {
                let message = progress.last_error.clone().unwrap_or_default();
                info!(session_id = %session_id, error = %message, "Import run failed");
                ImportEvent::RunFailed {
                    session_id,
                    error: message,
                    timestamp: now,
                }
            }
        };
        self.event_bus.emit_lossy(event);

        Ok(progress)
    }

    async fn store_failure(
        &self,
        progress: ImportProgress,
        err: importd_common::Error,
    ) -> Result<ImportProgress, ImportError> {
        let session_id = progress.session_id.unwrap_or_default();
        error!(session_id = %session_id, error = %err, "Store failed mid-run");
        let message = ImportError::from(err).to_string();
        self.finish(progress, ImportStatus::Failed, Some(message)).await
    }

    async fn lock_lost(&self, session_id: Uuid) -> Result<ImportProgress, ImportError> {
        warn!(session_id = %session_id, "Run lock no longer held (emergency reset?) - stopping without writing");
        self.cancellation_tokens.write().await.remove(&session_id);
        Err(ImportError::FatalRun("run lock lost to an emergency reset".to_string()))
    }

    async fn release_quietly(&self, session_id: Uuid) {
        match self.store.release(session_id).await {
            Ok(true) => {}
            Ok(false) => warn!(session_id = %session_id, "Release skipped: lock not held by session"),
            Err(e) => error!(session_id = %session_id, error = %e, "Failed to release run lock"),
        }
    }

    /// Request cooperative cancellation of `session_id`
    ///
    /// # Errors
    /// `NotRunning` when nothing is held or `session_id` is not the holder
    pub async fn cancel(&self, session_id: Uuid) -> Result<(), ImportError> {
        if !self.store.request_cancel(session_id).await? {
            return Err(ImportError::NotRunning);
        }

        if let Some(token) = self.cancellation_tokens.read().await.get(&session_id) {
            token.cancel();
        }

        info!(session_id = %session_id, "Cancellation requested");
        Ok(())
    }

    /// Clear lock and progress unconditionally; stops the previous holder's batch loop
    ///
    /// Reserved for emergency recovery. Returns the previous holder.
    pub async fn force_reset(&self) -> Result<Option<Uuid>, ImportError> {
        let previous = self.store.force_release().await?;

        // Only the run that held the lock is stopped; a run that acquired
        // after the release keeps its token
        if let Some(session_id) = previous {
            if let Some(token) = self.cancellation_tokens.write().await.remove(&session_id) {
                token.cancel();
            }
        }

        warn!(previous_session = ?previous, "Run lock force-released, progress reset to idle");
        self.event_bus.emit_lossy(ImportEvent::LockReset {
            previous_session: previous,
            timestamp: Utc::now(),
        });

        Ok(previous)
    }

    /// Session holding the lock, if any
    pub async fn active_session(&self) -> Result<Option<Uuid>, ImportError> {
        let lock = self.store.read_lock().await?;
        Ok(if lock.held { lock.session_id } else { None })
    }

    /// Current or last progress record
    pub async fn progress(&self) -> Result<ImportProgress, ImportError> {
        Ok(self.store.read_progress().await?)
    }
}
