//! Progress & lock store
//!
//! `CoordinationStore` is the only authority for mutual exclusion. The lock
//! carries the holder's session id, so heartbeat, release and cancellation
//! are checked against the true holder.

use async_trait::async_trait;
use chrono::Utc;
use importd_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::models::{ImportProgress, ImportStats, RunLock};
use crate::utils::retry_on_lock;

/// Durable lock, progress and counter storage
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomic compare-and-set; true only if no lock was held
    async fn acquire(&self, session_id: Uuid) -> Result<bool>;

    /// Refresh the heartbeat; false when `session_id` is not the holder
    async fn heartbeat(&self, session_id: Uuid) -> Result<bool>;

    /// Clear the lock if `session_id` holds it
    async fn release(&self, session_id: Uuid) -> Result<bool>;

    /// Clear lock and progress regardless of holder; returns the previous holder
    async fn force_release(&self) -> Result<Option<Uuid>>;

    /// Persist progress; a record with a session id is written only while
    /// that session holds the lock (false when refused)
    async fn write_progress(&self, progress: &ImportProgress) -> Result<bool>;

    async fn read_progress(&self) -> Result<ImportProgress>;

    async fn read_lock(&self) -> Result<RunLock>;

    /// Persist the cancellation flag; false when `session_id` is not the holder
    async fn request_cancel(&self, session_id: Uuid) -> Result<bool>;

    /// Flag set for the current holder
    async fn cancel_requested(&self, session_id: Uuid) -> Result<bool> {
        let lock = self.read_lock().await?;
        Ok(lock.is_held_by(session_id) && lock.cancel_requested)
    }

    /// Update historical counters from a terminal record
    async fn record_terminal(&self, progress: &ImportProgress) -> Result<()>;

    async fn read_stats(&self) -> Result<ImportStats>;

    /// Fail an active progress record that no held lock backs
    async fn fail_orphaned_run(&self, reason: &str) -> Result<bool>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self { db, max_lock_wait_ms }
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn acquire(&self, session_id: Uuid) -> Result<bool> {
        retry_on_lock("acquire lock", self.max_lock_wait_ms, || {
            db::lock::try_acquire(&self.db, session_id, Utc::now())
        })
        .await
    }

    async fn heartbeat(&self, session_id: Uuid) -> Result<bool> {
        retry_on_lock("heartbeat", self.max_lock_wait_ms, || {
            db::lock::heartbeat(&self.db, session_id, Utc::now())
        })
        .await
    }

    async fn release(&self, session_id: Uuid) -> Result<bool> {
        retry_on_lock("release lock", self.max_lock_wait_ms, || {
            db::lock::release(&self.db, session_id)
        })
        .await
    }

    async fn force_release(&self) -> Result<Option<Uuid>> {
        retry_on_lock("force release", self.max_lock_wait_ms, || {
            db::lock::force_release(&self.db)
        })
        .await
    }

    async fn write_progress(&self, progress: &ImportProgress) -> Result<bool> {
        retry_on_lock("write progress", self.max_lock_wait_ms, || {
            db::progress::save(&self.db, progress)
        })
        .await
    }

    async fn read_progress(&self) -> Result<ImportProgress> {
        db::progress::load(&self.db).await
    }

    async fn read_lock(&self) -> Result<RunLock> {
        db::lock::load(&self.db).await
    }

    async fn request_cancel(&self, session_id: Uuid) -> Result<bool> {
        retry_on_lock("request cancel", self.max_lock_wait_ms, || {
            db::lock::request_cancel(&self.db, session_id)
        })
        .await
    }

    async fn record_terminal(&self, progress: &ImportProgress) -> Result<()> {
        retry_on_lock("record stats", self.max_lock_wait_ms, || {
            db::stats::record_terminal(&self.db, progress)
        })
        .await
    }

    async fn read_stats(&self) -> Result<ImportStats> {
        db::stats::load(&self.db).await
    }

    async fn fail_orphaned_run(&self, reason: &str) -> Result<bool> {
        retry_on_lock("fail orphaned run", self.max_lock_wait_ms, || {
            db::progress::fail_orphaned(&self.db, reason)
        })
        .await
    }
}
