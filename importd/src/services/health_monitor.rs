//! Health monitor
//!
//! Read-only: evaluates system resources and lock sanity and classifies a
//! held lock whose heartbeat is older than the stuck threshold as stuck.
//! Never mutates coordination state; recovery is `services::recovery`.

use chrono::{DateTime, Utc};
use importd_common::ImportConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Disks, System};

use crate::error::ImportError;
use crate::models::{HealthCheck, HealthCheckResult, ImportProgress, RunLock};
use crate::store::CoordinationStore;

/// Minimum non-zero execution budget, in seconds
pub const MIN_EXECUTION_SECS: u64 = 300;

pub struct HealthMonitor {
    store: Arc<dyn CoordinationStore>,
    data_dir: PathBuf,
    stuck_threshold_secs: u64,
    min_free_disk_mb: u64,
    min_available_memory_mb: u64,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn CoordinationStore>, data_dir: PathBuf, stuck_threshold_secs: u64) -> Self {
        Self {
            store,
            data_dir,
            stuck_threshold_secs,
            min_free_disk_mb: 100,
            min_available_memory_mb: 128,
        }
    }

    pub fn with_resource_minimums(mut self, min_free_disk_mb: u64, min_available_memory_mb: u64) -> Self {
        self.min_free_disk_mb = min_free_disk_mb;
        self.min_available_memory_mb = min_available_memory_mb;
        self
    }

    pub fn stuck_threshold_secs(&self) -> u64 {
        self.stuck_threshold_secs
    }

    pub async fn check(&self, config: &ImportConfig) -> Result<HealthCheckResult, ImportError> {
        self.check_at(config, Utc::now()).await
    }

    /// Evaluate all checks as of `now`
    pub async fn check_at(
        &self,
        config: &ImportConfig,
        now: DateTime<Utc>,
    ) -> Result<HealthCheckResult, ImportError> {
        let lock = self.store.read_lock().await?;
        let progress = self.store.read_progress().await?;

        let stuck = lock.is_stuck(now, self.stuck_threshold_secs);
        let no_stuck_processes = stuck_check(&lock, now, self.stuck_threshold_secs);
        if stuck {
            tracing::warn!(
                session_id = ?lock.session_id,
                heartbeat_at = ?lock.heartbeat_at,
                threshold_secs = self.stuck_threshold_secs,
                "Import run classified as stuck"
            );
        }

        let (memory_ok, disk_space_ok) = {
            let data_dir = self.data_dir.clone();
            let min_mem = self.min_available_memory_mb;
            let min_disk = self.min_free_disk_mb;
            tokio::task::spawn_blocking(move || (memory_check(min_mem), disk_check(&data_dir, min_disk)))
                .await
                .unwrap_or_else(|e| {
                    let failed = HealthCheck::fail(format!("resource probe failed: {}", e));
                    (failed.clone(), failed)
                })
        };

        let permissions_ok = permissions_check(&self.data_dir).await;
        let time_ok = time_check(config.max_execution_secs);
        let network_ok = network_check();
        let import_locks_ok = lock_sanity_check(&lock, &progress);

        let mut result = HealthCheckResult {
            memory_ok,
            disk_space_ok,
            permissions_ok,
            time_ok,
            network_ok,
            import_locks_ok,
            no_stuck_processes,
            healthy: false,
            stuck,
        };
        result.healthy = result.failing().is_empty();
        Ok(result)
    }
}

fn stuck_check(lock: &RunLock, now: DateTime<Utc>, threshold_secs: u64) -> HealthCheck {
    match (lock.held, lock.heartbeat_age_secs(now)) {
        (false, _) => HealthCheck::pass("no run holds the lock"),
        (true, Some(age)) if age > threshold_secs as i64 => HealthCheck::fail(format!(
            "no heartbeat for {}s (threshold {}s)",
            age, threshold_secs
        )),
        (true, Some(age)) => HealthCheck::pass(format!("last heartbeat {}s ago", age)),
        (true, None) => HealthCheck::fail("lock held without heartbeat"),
    }
}

/// A held lock names a holder that matches progress; an unheld lock has no active record
fn lock_sanity_check(lock: &RunLock, progress: &ImportProgress) -> HealthCheck {
    if lock.held {
        match lock.session_id {
            None => HealthCheck::fail("lock held without a session id"),
            Some(holder) if progress.session_id != Some(holder) => HealthCheck::fail(format!(
                "lock holder {} does not match progress session {}",
                holder,
                progress
                    .session_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string())
            )),
            Some(holder) => HealthCheck::pass(format!("held by {}", holder)),
        }
    } else if progress.status.is_active() {
        HealthCheck::fail(format!(
            "progress is {} but no lock is held",
            progress.status
        ))
    } else {
        HealthCheck::pass("lock free")
    }
}

fn time_check(max_execution_secs: u64) -> HealthCheck {
    if max_execution_secs == 0 {
        HealthCheck::pass("unlimited")
    } else if max_execution_secs >= MIN_EXECUTION_SECS {
        HealthCheck::pass(format!("{}s", max_execution_secs))
    } else {
        HealthCheck::fail(format!(
            "{}s is below the {}s minimum",
            max_execution_secs, MIN_EXECUTION_SECS
        ))
    }
}

fn memory_check(min_available_mb: u64) -> HealthCheck {
    let mut sys = System::new();
    sys.refresh_memory();
    let available_mb = sys.available_memory() / 1024 / 1024;
    if available_mb >= min_available_mb {
        HealthCheck::pass(format!("{} MiB available", available_mb))
    } else {
        HealthCheck::fail(format!(
            "{} MiB available (minimum {} MiB)",
            available_mb, min_available_mb
        ))
    }
}

fn disk_check(data_dir: &Path, min_free_mb: u64) -> HealthCheck {
    let disks = Disks::new_with_refreshed_list();
    let canonical = data_dir.canonicalize().unwrap_or_else(|_| data_dir.to_path_buf());

    // Disk with the longest mount point containing the data folder
    let disk = disks
        .list()
        .iter()
        .filter(|d| canonical.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    match disk {
        Some(disk) => {
            let free_mb = disk.available_space() / 1024 / 1024;
            if free_mb >= min_free_mb {
                HealthCheck::pass(format!("{} MiB free", free_mb))
            } else {
                HealthCheck::fail(format!("{} MiB free (minimum {} MiB)", free_mb, min_free_mb))
            }
        }
        None => HealthCheck::pass("disk not reported by the OS"),
    }
}

async fn permissions_check(data_dir: &Path) -> HealthCheck {
    let probe = data_dir.join(format!(".health-probe-{}", uuid::Uuid::new_v4()));
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            HealthCheck::pass(format!("{} writable", data_dir.display()))
        }
        Err(e) => HealthCheck::fail(format!("{} not writable: {}", data_dir.display(), e)),
    }
}

fn network_check() -> HealthCheck {
    match reqwest::Client::builder().build() {
        Ok(_) => HealthCheck::pass("http client available"),
        Err(e) => HealthCheck::fail(format!("http client unavailable: {}", e)),
    }
}
