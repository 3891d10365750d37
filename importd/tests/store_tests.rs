//! Progress & lock store tests against a real SQLite file

mod helpers;

use importd::models::{ImportProgress, ImportStatus};
use importd_common::SourceKind;
use tokio::task::JoinSet;
use uuid::Uuid;

#[tokio::test]
async fn test_concurrent_acquire_has_single_winner() {
    let env = helpers::setup().await;

    let mut join_set = JoinSet::new();
    for _ in 0..16 {
        let store = env.store.clone();
        join_set.spawn(async move {
            let session_id = Uuid::new_v4();
            (session_id, store.acquire(session_id).await.unwrap())
        });
    }

    let mut winners = Vec::new();
    while let Some(result) = join_set.join_next().await {
        let (session_id, won) = result.unwrap();
        if won {
            winners.push(session_id);
        }
    }

    assert_eq!(winners.len(), 1, "exactly one acquire must succeed");
    let lock = env.store.read_lock().await.unwrap();
    assert!(lock.held);
    assert_eq!(lock.session_id, Some(winners[0]));
}

#[tokio::test]
async fn test_holder_checks_on_heartbeat_release_and_cancel() {
    let env = helpers::setup().await;
    let holder = Uuid::new_v4();
    let intruder = Uuid::new_v4();

    assert!(env.store.acquire(holder).await.unwrap());
    assert!(!env.store.acquire(intruder).await.unwrap());

    assert!(env.store.heartbeat(holder).await.unwrap());
    assert!(!env.store.heartbeat(intruder).await.unwrap());

    assert!(!env.store.request_cancel(intruder).await.unwrap());
    assert!(!env.store.cancel_requested(holder).await.unwrap());
    assert!(env.store.request_cancel(holder).await.unwrap());
    assert!(env.store.cancel_requested(holder).await.unwrap());

    assert!(!env.store.release(intruder).await.unwrap());
    assert!(env.store.read_lock().await.unwrap().held);
    assert!(env.store.release(holder).await.unwrap());

    let lock = env.store.read_lock().await.unwrap();
    assert!(!lock.held);
    assert_eq!(lock.session_id, None);
    assert!(!lock.cancel_requested);

    // Free again
    assert!(env.store.acquire(intruder).await.unwrap());
}

#[tokio::test]
async fn test_force_release_is_unconditional() {
    let env = helpers::setup().await;
    let holder = Uuid::new_v4();

    assert!(env.store.acquire(holder).await.unwrap());
    let progress = ImportProgress::validating(holder, SourceKind::Local);
    assert!(env.store.write_progress(&progress).await.unwrap());

    assert_eq!(env.store.force_release().await.unwrap(), Some(holder));

    let lock = env.store.read_lock().await.unwrap();
    assert!(!lock.held);
    let progress = env.store.read_progress().await.unwrap();
    assert_eq!(progress.status, ImportStatus::Idle);
    assert_eq!(progress.session_id, None);

    // Nothing held: still succeeds
    assert_eq!(env.store.force_release().await.unwrap(), None);
}

#[tokio::test]
async fn test_progress_write_refused_once_lock_is_lost() {
    let env = helpers::setup().await;
    let holder = Uuid::new_v4();

    assert!(env.store.acquire(holder).await.unwrap());
    let mut progress = ImportProgress::validating(holder, SourceKind::Local);
    assert!(env.store.write_progress(&progress).await.unwrap());

    env.store.force_release().await.unwrap();

    progress.status = ImportStatus::Processing;
    progress.advance(10, Some(20), 10, 0);
    assert!(!env.store.write_progress(&progress).await.unwrap());
    assert_eq!(
        env.store.read_progress().await.unwrap().status,
        ImportStatus::Idle
    );
}

#[tokio::test]
async fn test_progress_roundtrip_preserves_counters() {
    let env = helpers::setup().await;
    let holder = Uuid::new_v4();
    assert!(env.store.acquire(holder).await.unwrap());

    let mut progress = ImportProgress::validating(holder, SourceKind::Remote);
    progress.status = ImportStatus::Processing;
    progress.advance(40, Some(100), 38, 2);
    assert!(env.store.write_progress(&progress).await.unwrap());

    let loaded = env.store.read_progress().await.unwrap();
    assert_eq!(loaded.status, ImportStatus::Processing);
    assert_eq!(loaded.session_id, Some(holder));
    assert_eq!(loaded.source_kind, Some(SourceKind::Remote));
    assert_eq!(loaded.processed, 40);
    assert_eq!(loaded.total, Some(100));
    assert_eq!(loaded.imported, 38);
    assert_eq!(loaded.failed_rows, 2);
    assert!((loaded.percent - 40.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_orphaned_active_record_is_failed() {
    let env = helpers::setup().await;
    let holder = Uuid::new_v4();

    assert!(env.store.acquire(holder).await.unwrap());
    let mut progress = ImportProgress::validating(holder, SourceKind::Local);
    progress.status = ImportStatus::Processing;
    assert!(env.store.write_progress(&progress).await.unwrap());

    // Backed by a held lock: left alone
    assert!(!env.store.fail_orphaned_run("gone").await.unwrap());

    // Lock released without a terminal record, as after a crash
    assert!(env.store.release(holder).await.unwrap());
    assert!(env.store.fail_orphaned_run("gone").await.unwrap());

    let progress = env.store.read_progress().await.unwrap();
    assert_eq!(progress.status, ImportStatus::Failed);
    assert_eq!(progress.last_error.as_deref(), Some("gone"));
    assert!(progress.ended_at.is_some());

    // Terminal now: nothing to clear
    assert!(!env.store.fail_orphaned_run("gone").await.unwrap());
}

#[tokio::test]
async fn test_terminal_records_accumulate_stats() {
    let env = helpers::setup().await;

    for imported in [7u64, 5] {
        let mut progress = ImportProgress::validating(Uuid::new_v4(), SourceKind::Local);
        progress.advance(imported, Some(imported), imported, 0);
        progress.finish(ImportStatus::Completed, None);
        env.store.record_terminal(&progress).await.unwrap();
    }

    let stats = env.store.read_stats().await.unwrap();
    assert_eq!(stats.total_imported, 12);
    assert_eq!(stats.last_count, 5);
    assert_eq!(stats.last_source, Some(SourceKind::Local));
    assert!(stats.last_run.is_some());
}
