//! Default maintenance collaborator
//!
//! - Temp files: removes every file in the temp folder when no run holds the
//!   lock, otherwise only files older than `min_age`
//! - Dead processes: fails a `validating`/`processing` record that no held
//!   lock backs (left behind when the service died mid-run)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::error::ImportError;
use crate::store::CoordinationStore;
use crate::types::MaintenanceHooks;

pub const ORPHANED_RUN_MESSAGE: &str = "run process terminated unexpectedly";

pub struct FsMaintenance {
    temp_dir: PathBuf,
    min_age: Duration,
    store: Arc<dyn CoordinationStore>,
}

impl FsMaintenance {
    pub fn new(temp_dir: PathBuf, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            temp_dir,
            min_age: Duration::from_secs(3600),
            store,
        }
    }

    /// While a run is active, only files untouched for `min_age` are removed
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }
}

#[async_trait::async_trait]
impl MaintenanceHooks for FsMaintenance {
    async fn cleanup_temp_files(&self) -> Result<u64, ImportError> {
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ImportError::FatalRun(format!(
                    "Read temp folder {} failed: {}",
                    self.temp_dir.display(),
                    e
                )))
            }
        };

        // An active run may still be reading its download
        let min_age = match self.store.read_lock().await {
            Ok(lock) if !lock.held => Duration::ZERO,
            _ => self.min_age,
        };

        let now = SystemTime::now();
        let mut removed = 0u64;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < min_age {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove temp file {}: {}", entry.path().display(), e),
            }
        }

        if removed > 0 {
            info!(removed, folder = %self.temp_dir.display(), "Temp files cleaned up");
        }
        Ok(removed)
    }

    async fn cleanup_dead_processes(&self) -> Result<u64, ImportError> {
        let cleared = self.store.fail_orphaned_run(ORPHANED_RUN_MESSAGE).await?;
        if cleared {
            warn!("Orphaned import record marked failed");
        }
        Ok(cleared as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use uuid::Uuid;

    async fn store_in(dir: &std::path::Path) -> Arc<dyn CoordinationStore> {
        let pool = crate::db::init_database_pool(&dir.join("importd.db")).await.unwrap();
        Arc::new(SqliteStore::new(pool, 1000))
    }

    #[tokio::test]
    async fn test_fresh_files_survive_while_a_run_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&temp_dir).unwrap();
        std::fs::write(temp_dir.join("import-a.csv"), "sku\n1\n").unwrap();
        let store = store_in(dir.path()).await;
        assert!(store.acquire(Uuid::new_v4()).await.unwrap());

        let maintenance = FsMaintenance::new(temp_dir.clone(), store.clone());
        assert_eq!(maintenance.cleanup_temp_files().await.unwrap(), 0);

        let maintenance = FsMaintenance::new(temp_dir.clone(), store).with_min_age(Duration::ZERO);
        assert_eq!(maintenance.cleanup_temp_files().await.unwrap(), 1);
        assert!(!temp_dir.join("import-a.csv").exists());
    }

    #[tokio::test]
    async fn test_idle_cleanup_ignores_min_age() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&temp_dir).unwrap();
        std::fs::write(temp_dir.join("import-b.csv"), "sku\n").unwrap();
        let store = store_in(dir.path()).await;

        let maintenance = FsMaintenance::new(temp_dir.clone(), store);
        assert_eq!(maintenance.cleanup_temp_files().await.unwrap(), 1);
        assert_eq!(maintenance.cleanup_temp_files().await.unwrap(), 0);
    }
}
