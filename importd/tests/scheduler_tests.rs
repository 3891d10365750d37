//! Scheduler tests
//!
//! Ticks are evaluated at fixed instants through `on_tick_at`, so cadence
//! arithmetic is exact while runs still go through the real controller.

mod helpers;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use importd::db;
use importd::models::schedule::HOURLY_SECS;
use importd::models::{ImportStatus, ScheduleAction, ScheduleEntry, TickOutcome};
use importd::ImportError;
use importd_common::events::ImportEvent;
use std::time::Duration;
use uuid::Uuid;

fn entry(cadence_id: &str, action: ScheduleAction, next_run_at: chrono::DateTime<Utc>) -> ScheduleEntry {
    ScheduleEntry {
        cadence_id: cadence_id.to_string(),
        interval_secs: HOURLY_SECS,
        next_run_at,
        action,
        source_kind: None,
        enabled: true,
    }
}

#[tokio::test]
async fn test_ensure_scheduled_registers_once() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;
    let before = Utc::now();

    assert!(scheduler
        .ensure_scheduled("hourly-import", HOURLY_SECS, ScheduleAction::Import, None)
        .await
        .unwrap());
    let first = scheduler.next_scheduled("hourly-import").await.unwrap().unwrap();
    assert!(first >= before + ChronoDuration::seconds(HOURLY_SECS - 1));

    // Existing entry keeps its timing
    assert!(!scheduler
        .ensure_scheduled("hourly-import", HOURLY_SECS, ScheduleAction::Import, None)
        .await
        .unwrap());
    assert_eq!(scheduler.next_scheduled("hourly-import").await.unwrap(), Some(first));

    assert!(scheduler
        .ensure_scheduled("bad", 0, ScheduleAction::Import, None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_unknown_cadence_is_config_error() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;

    let err = scheduler.on_tick("nope").await.unwrap_err();
    assert!(matches!(err, ImportError::Config(_)), "got {err}");
}

#[tokio::test]
async fn test_tick_before_boundary_is_not_due() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

    scheduler
        .schedule(entry("hourly-import", ScheduleAction::Import, base))
        .await
        .unwrap();

    let outcome = scheduler
        .on_tick_at("hourly-import", base - ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::NotDue { next_run_at: base });
    assert!(!env.store.read_lock().await.unwrap().held);
}

#[tokio::test]
async fn test_due_tick_starts_import_with_stored_config() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator(&env);
    let source = helpers::write_csv(env.root(), "items.csv", 8);
    db::settings::save_import_config(&env.pool, &helpers::local_config(&source, 5))
        .await
        .unwrap();

    let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    coordinator
        .scheduler
        .schedule(entry("hourly-import", ScheduleAction::Import, base))
        .await
        .unwrap();

    let now = base + ChronoDuration::seconds(5);
    let outcome = coordinator.scheduler.on_tick_at("hourly-import", now).await.unwrap();

    let TickOutcome::Started { session_id, next_run_at } = outcome else {
        panic!("expected a started run, got {:?}", outcome);
    };
    assert_eq!(next_run_at, base + ChronoDuration::hours(1));
    assert_eq!(
        coordinator.scheduler.next_scheduled("hourly-import").await.unwrap(),
        Some(next_run_at)
    );

    // Wait for the scheduled run to finish
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let progress = env.store.read_progress().await.unwrap();
        if progress.session_id == Some(session_id) && progress.status.is_terminal() {
            assert_eq!(progress.status, ImportStatus::Completed);
            assert_eq!(progress.imported, 8);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "scheduled run did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_skipped_tick_advances_without_backfill() {
    let env = helpers::setup().await;
    let coordinator = helpers::coordinator(&env);
    let source = helpers::write_csv(env.root(), "items.csv", 3);
    db::settings::save_import_config(&env.pool, &helpers::local_config(&source, 5))
        .await
        .unwrap();
    let mut rx = env.event_bus.subscribe();

    // Another run owns the lock
    let holder = Uuid::new_v4();
    assert!(env.store.acquire(holder).await.unwrap());

    let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    coordinator
        .scheduler
        .schedule(entry("hourly-import", ScheduleAction::Import, base))
        .await
        .unwrap();

    // Three and a half cadences late
    let now = base + ChronoDuration::minutes(210);
    let outcome = coordinator.scheduler.on_tick_at("hourly-import", now).await.unwrap();

    let expected_next = base + ChronoDuration::hours(4);
    assert_eq!(outcome, TickOutcome::Skipped { next_run_at: expected_next });
    assert_eq!(
        coordinator.scheduler.next_scheduled("hourly-import").await.unwrap(),
        Some(expected_next)
    );

    // Holder untouched
    let lock = env.store.read_lock().await.unwrap();
    assert!(lock.is_held_by(holder));

    match rx.try_recv() {
        Ok(ImportEvent::TickSkipped { cadence_id, next_run_at, .. }) => {
            assert_eq!(cadence_id, "hourly-import");
            assert_eq!(next_run_at, expected_next);
        }
        other => panic!("expected TickSkipped, got {:?}", other),
    }

    // Same instant again: already advanced, nothing queued
    let again = coordinator.scheduler.on_tick_at("hourly-import", now).await.unwrap();
    assert_eq!(again, TickOutcome::NotDue { next_run_at: expected_next });
}

#[tokio::test]
async fn test_invalid_config_tick_fails_and_still_advances() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

    // No stored config and no location in the fallback
    scheduler
        .schedule(entry("hourly-import", ScheduleAction::Import, base))
        .await
        .unwrap();

    let outcome = scheduler.on_tick_at("hourly-import", base).await.unwrap();
    match outcome {
        TickOutcome::Failed { message, next_run_at } => {
            assert!(message.contains("source location missing"));
            assert_eq!(next_run_at, base + ChronoDuration::hours(1));
        }
        other => panic!("expected failed tick, got {:?}", other),
    }
    assert!(!env.store.read_lock().await.unwrap().held);
}

#[tokio::test]
async fn test_maintenance_tick_clears_temp_files() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;
    std::fs::write(env.temp_path().join("import-stale.csv"), "sku\n1\n").unwrap();

    let base = Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap();
    scheduler
        .schedule(entry("daily-maintenance", ScheduleAction::Maintenance, base))
        .await
        .unwrap();

    let outcome = scheduler.on_tick_at("daily-maintenance", base).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Maintained {
            removed_files: 1,
            next_run_at: base + ChronoDuration::hours(1),
        }
    );
    assert!(!env.temp_path().join("import-stale.csv").exists());
}

#[tokio::test]
async fn test_tick_all_reports_each_cadence() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap();

    scheduler
        .schedule(entry("due-maintenance", ScheduleAction::Maintenance, base))
        .await
        .unwrap();
    scheduler
        .schedule(entry(
            "later-maintenance",
            ScheduleAction::Maintenance,
            base + ChronoDuration::hours(2),
        ))
        .await
        .unwrap();

    let outcomes = scheduler.tick_all(base).await;
    assert_eq!(outcomes.len(), 2);
    for (cadence_id, outcome) in outcomes {
        match cadence_id.as_str() {
            "due-maintenance" => assert!(matches!(outcome, TickOutcome::Maintained { .. })),
            "later-maintenance" => assert!(matches!(outcome, TickOutcome::NotDue { .. })),
            other => panic!("unexpected cadence {other}"),
        }
    }

    assert!(scheduler.unschedule("later-maintenance").await.unwrap());
    assert!(!scheduler.unschedule("later-maintenance").await.unwrap());
    assert_eq!(scheduler.entries().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ticks_fire_each_boundary_once() {
    let env = helpers::setup().await;
    let scheduler = helpers::coordinator(&env).scheduler;
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap();

    for round in 0..25 {
        scheduler
            .schedule(entry("daily-maintenance", ScheduleAction::Maintenance, base))
            .await
            .unwrap();

        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let scheduler = scheduler.clone();
            join_set.spawn(async move {
                scheduler
                    .on_tick_at("daily-maintenance", base + ChronoDuration::seconds(1))
                    .await
                    .unwrap()
            });
        }

        let mut fired = 0;
        while let Some(result) = join_set.join_next().await {
            match result.unwrap() {
                TickOutcome::Maintained { next_run_at, .. } => {
                    assert_eq!(next_run_at, base + ChronoDuration::hours(1));
                    fired += 1;
                }
                TickOutcome::NotDue { next_run_at } => {
                    assert_eq!(next_run_at, base + ChronoDuration::hours(1));
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(fired, 1, "round {round}: boundary fired {fired} times");
    }
}
