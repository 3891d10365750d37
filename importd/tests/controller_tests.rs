//! Import run controller tests
//!
//! Runs go through the real SQLite store and local file sources; sinks are
//! swapped to control timing and row outcomes.

mod helpers;

use async_trait::async_trait;
use helpers::{RejectingSink, SlowSink};
use importd::models::{ImportProgress, ImportStats, ImportStatus, RunLock};
use importd::store::CoordinationStore;
use importd::ImportError;
use importd_common::events::ImportEvent;
use importd_common::SourceKind;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_completed_run_imports_rows_and_releases_lock() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator(&env);
    let source = helpers::write_csv(env.root(), "items.csv", 12);

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 5), "test")
        .await
        .unwrap();
    let session_id = handle.session_id;
    let progress = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();

    assert_eq!(progress.status, ImportStatus::Completed);
    assert_eq!(progress.session_id, Some(session_id));
    assert_eq!(progress.processed, 12);
    assert_eq!(progress.imported, 12);
    assert_eq!(progress.total, Some(12));
    assert!((progress.percent - 100.0).abs() < f64::EPSILON);

    assert!(!env.store.read_lock().await.unwrap().held);
    assert_eq!(
        env.store.read_progress().await.unwrap().status,
        ImportStatus::Completed
    );

    let stats = env.store.read_stats().await.unwrap();
    assert_eq!(stats.total_imported, 12);
    assert_eq!(stats.last_count, 12);

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM imported_records WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(rows, 12);
}

#[tokio::test]
async fn test_progress_events_never_decrease() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator(&env);
    let source = helpers::write_csv(env.root(), "items.csv", 23);
    let mut rx = env.event_bus.subscribe();

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 4), "test")
        .await
        .unwrap();
    tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();

    let mut percents = Vec::new();
    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            ImportEvent::Progress { percent, .. } => percents.push(percent),
            ImportEvent::RunCompleted { imported, .. } => {
                assert_eq!(imported, 23);
                completed = true;
            }
            _ => {}
        }
    }

    assert!(completed);
    assert_eq!(percents.len(), 6, "one progress event per batch");
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "percent regressed: {:?}", percents);
}

#[tokio::test]
async fn test_validation_failure_records_failed_run() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator(&env);

    let err = coordinator
        .controller
        .start(SourceKind::Local, importd_common::ImportConfig::default(), "test")
        .await
        .unwrap_err();

    match err {
        ImportError::Validation(errors) => assert_eq!(errors, vec!["source location missing"]),
        other => panic!("expected validation error, got {other}"),
    }

    assert!(!env.store.read_lock().await.unwrap().held);
    let progress = env.store.read_progress().await.unwrap();
    assert_eq!(progress.status, ImportStatus::Failed);
    assert!(progress.last_error.unwrap().contains("source location missing"));
}

#[tokio::test]
async fn test_unreachable_source_is_source_unavailable() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator(&env);
    let missing = env.root().join("does-not-exist.csv");

    let err = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&missing, 5), "test")
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::SourceUnavailable(_)), "got {err}");
    assert!(!env.store.read_lock().await.unwrap().held);
}

#[tokio::test]
async fn test_cancellation_stops_within_one_batch() {
    let env = helpers::setup().await;
    let sink = SlowSink::new(Duration::from_millis(50));
    let coordinator = helpers::coordinator_with_sink(&env, sink.clone());
    let source = helpers::write_csv(env.root(), "items.csv", 200);

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 5), "test")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.controller.cancel(handle.session_id).await.unwrap();
    let batches_at_cancel = sink.batches();

    let progress = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();

    assert_eq!(progress.status, ImportStatus::Cancelled);
    assert!(
        sink.batches() <= batches_at_cancel + 1,
        "at most the in-flight batch completes after cancel"
    );
    assert!(progress.processed < 200);
    assert!(!env.store.read_lock().await.unwrap().held);
}

#[tokio::test]
async fn test_cancel_requires_the_running_session() {
    let env = helpers::setup().await;
    let sink = SlowSink::new(Duration::from_millis(20));
    let coordinator = helpers::coordinator_with_sink(&env, sink);
    let source = helpers::write_csv(env.root(), "items.csv", 20);

    // Nothing running
    assert!(matches!(
        coordinator.controller.cancel(Uuid::new_v4()).await,
        Err(ImportError::NotRunning)
    ));

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 5), "test")
        .await
        .unwrap();

    assert!(matches!(
        coordinator.controller.cancel(Uuid::new_v4()).await,
        Err(ImportError::NotRunning)
    ));

    let session_id = handle.session_id;
    let progress = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();
    assert_eq!(progress.status, ImportStatus::Completed);

    // Already terminal
    assert!(matches!(
        coordinator.controller.cancel(session_id).await,
        Err(ImportError::NotRunning)
    ));
}

#[tokio::test]
async fn test_consecutive_row_failures_fail_the_run() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator_with_sink(&env, Arc::new(RejectingSink));
    let source = helpers::write_csv(env.root(), "items.csv", 40);

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 5), "test")
        .await
        .unwrap();
    let progress = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();

    // 25 consecutive rejections are tolerated; the batch that exceeds it fails
    assert_eq!(progress.status, ImportStatus::Failed);
    assert_eq!(progress.processed, 30);
    assert_eq!(progress.failed_rows, 30);
    assert!(progress.last_error.unwrap().contains("threshold"));
    assert!(!env.store.read_lock().await.unwrap().held);
}

#[tokio::test]
async fn test_rejected_rows_below_threshold_are_counted() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator_with_sink(&env, Arc::new(RejectingSink));
    let source = helpers::write_csv(env.root(), "items.csv", 20);

    let mut config = helpers::local_config(&source, 5);
    config.row_failure_threshold = 50;
    config.consecutive_failure_threshold = 50;

    let handle = coordinator
        .controller
        .start(SourceKind::Local, config, "test")
        .await
        .unwrap();
    let progress = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();

    assert_eq!(progress.status, ImportStatus::Completed);
    assert_eq!(progress.failed_rows, 20);
    assert_eq!(progress.imported, 0);
}

#[tokio::test]
async fn test_second_start_while_active_is_rejected() {
    let env = helpers::setup().await;
    let sink = SlowSink::new(Duration::from_millis(30));
    let coordinator = helpers::coordinator_with_sink(&env, sink);
    let source = helpers::write_csv(env.root(), "items.csv", 30);
    let config = helpers::local_config(&source, 5);

    let first = coordinator
        .controller
        .start(SourceKind::Local, config.clone(), "api:first")
        .await
        .unwrap();

    let err = coordinator
        .controller
        .start(SourceKind::Local, config.clone(), "api:second")
        .await
        .unwrap_err();
    match err {
        ImportError::LockContention { holder } => assert_eq!(holder, Some(first.session_id)),
        other => panic!("expected lock contention, got {other}"),
    }

    // Rejected start left the active run's record alone
    assert_eq!(
        env.store.read_progress().await.unwrap().session_id,
        Some(first.session_id)
    );

    let progress = tokio::time::timeout(WAIT, first.wait()).await.unwrap().unwrap();
    assert_eq!(progress.status, ImportStatus::Completed);

    // Lock free again
    let third = coordinator
        .controller
        .start(SourceKind::Local, config, "api:third")
        .await
        .unwrap();
    tokio::time::timeout(WAIT, third.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_force_reset_stops_run_without_overwriting_state() {
    let env = helpers::setup().await;
    let sink = SlowSink::new(Duration::from_millis(50));
    let coordinator = helpers::coordinator_with_sink(&env, sink);
    let source = helpers::write_csv(env.root(), "items.csv", 200);
    let config = helpers::local_config(&source, 5);

    let handle = coordinator
        .controller
        .start(SourceKind::Local, config.clone(), "test")
        .await
        .unwrap();
    let session_id = handle.session_id;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(coordinator.controller.force_reset().await.unwrap(), Some(session_id));

    let result = tokio::time::timeout(WAIT, handle.wait()).await.unwrap();
    assert!(matches!(result, Err(ImportError::FatalRun(_))));

    // The stopped loop wrote nothing after the reset
    let progress = env.store.read_progress().await.unwrap();
    assert_eq!(progress.status, ImportStatus::Idle);
    assert!(!env.store.read_lock().await.unwrap().held);

    let next = coordinator
        .controller
        .start(SourceKind::Local, config, "test")
        .await
        .unwrap();
    assert_ne!(next.session_id, session_id);
    coordinator.controller.cancel(next.session_id).await.unwrap();
    tokio::time::timeout(WAIT, next.wait()).await.unwrap().unwrap();
}

/// Store that stalls after a force release, leaving a gap in which another
/// run can take the lock before `force_reset` returns
struct StallingStore {
    inner: Arc<dyn CoordinationStore>,
    stall: Duration,
}

#[async_trait]
impl CoordinationStore for StallingStore {
    async fn acquire(&self, session_id: Uuid) -> importd_common::Result<bool> {
        self.inner.acquire(session_id).await
    }

    async fn heartbeat(&self, session_id: Uuid) -> importd_common::Result<bool> {
        self.inner.heartbeat(session_id).await
    }

    async fn release(&self, session_id: Uuid) -> importd_common::Result<bool> {
        self.inner.release(session_id).await
    }

    async fn force_release(&self) -> importd_common::Result<Option<Uuid>> {
        let previous = self.inner.force_release().await?;
        tokio::time::sleep(self.stall).await;
        Ok(previous)
    }

    async fn write_progress(&self, progress: &ImportProgress) -> importd_common::Result<bool> {
        self.inner.write_progress(progress).await
    }

    async fn read_progress(&self) -> importd_common::Result<ImportProgress> {
        self.inner.read_progress().await
    }

    async fn read_lock(&self) -> importd_common::Result<RunLock> {
        self.inner.read_lock().await
    }

    async fn request_cancel(&self, session_id: Uuid) -> importd_common::Result<bool> {
        self.inner.request_cancel(session_id).await
    }

    async fn record_terminal(&self, progress: &ImportProgress) -> importd_common::Result<()> {
        self.inner.record_terminal(progress).await
    }

    async fn read_stats(&self) -> importd_common::Result<ImportStats> {
        self.inner.read_stats().await
    }

    async fn fail_orphaned_run(&self, reason: &str) -> importd_common::Result<bool> {
        self.inner.fail_orphaned_run(reason).await
    }
}

#[tokio::test]
async fn test_force_reset_leaves_newer_run_running() {
    let env = helpers::setup().await;
    let store: Arc<dyn CoordinationStore> = Arc::new(StallingStore {
        inner: env.store.clone(),
        stall: Duration::from_millis(300),
    });
    let sink = SlowSink::new(Duration::from_millis(50));
    let coordinator = helpers::coordinator_with(&env, store, sink);
    let slow_source = helpers::write_csv(env.root(), "slow.csv", 200);
    let next_source = helpers::write_csv(env.root(), "next.csv", 50);

    let first = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&slow_source, 5), "test")
        .await
        .unwrap();
    let first_session = first.session_id;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let controller = coordinator.controller.clone();
    let reset = tokio::spawn(async move { controller.force_reset().await });

    // Inside the stall: the lock is already free
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&next_source, 5), "test")
        .await
        .unwrap();

    assert_eq!(reset.await.unwrap().unwrap(), Some(first_session));
    assert!(matches!(
        tokio::time::timeout(WAIT, first.wait()).await.unwrap(),
        Err(ImportError::FatalRun(_))
    ));

    let progress = tokio::time::timeout(WAIT, second.wait()).await.unwrap().unwrap();
    assert_eq!(progress.status, ImportStatus::Completed);
    assert_eq!(progress.processed, 50);
}

#[tokio::test]
async fn test_heartbeat_continues_while_source_opens() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator_with_slow_open(
        &env,
        Duration::from_millis(2500),
        Duration::from_millis(200),
        1,
    );
    let source = helpers::write_csv(env.root(), "items.csv", 10);

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 5), "test")
        .await
        .unwrap();
    assert_eq!(
        coordinator.controller.active_session().await.unwrap(),
        Some(handle.session_id)
    );

    // Past the stuck threshold with the opener still busy
    tokio::time::sleep(Duration::from_millis(2200)).await;
    let lock = env.store.read_lock().await.unwrap();
    assert!(lock.is_held_by(handle.session_id));
    assert!(lock.heartbeat_at.unwrap() > lock.acquired_at.unwrap());

    let health = coordinator.check_health().await.unwrap();
    assert!(!health.stuck);
    assert!(health.no_stuck_processes.ok);

    let progress = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();
    assert_eq!(progress.status, ImportStatus::Completed);
    assert_eq!(progress.processed, 10);
    assert_eq!(coordinator.controller.active_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_cancel_while_source_opens() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator_with_slow_open(
        &env,
        Duration::from_secs(10),
        Duration::from_millis(100),
        300,
    );
    let source = helpers::write_csv(env.root(), "items.csv", 10);

    let handle = coordinator
        .controller
        .start(SourceKind::Local, helpers::local_config(&source, 5), "test")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.controller.cancel(handle.session_id).await.unwrap();

    let progress = tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, ImportStatus::Cancelled);
    assert_eq!(progress.processed, 0);
    assert!(!env.store.read_lock().await.unwrap().held);
}
