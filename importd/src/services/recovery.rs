//! Emergency reset
//!
//! The only path allowed to override normal lock-release discipline. It
//! records what the health monitor saw, force-resets the controller and then
//! runs collaborator cleanup. Callers must have authorized and explicitly
//! confirmed the request.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::models::HealthCheckResult;
use crate::services::controller::Controller;
use crate::types::MaintenanceHooks;

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    /// Health monitor classified the run as stuck before the reset
    pub was_stuck: bool,
    /// Lock holder at the time of the reset
    pub previous_session: Option<Uuid>,
    pub temp_files_removed: u64,
    pub dead_processes_cleared: u64,
    /// Cleanup failures; the reset itself still happened
    pub cleanup_errors: Vec<String>,
}

/// Force-reset the run lock and clean up
///
/// # Errors
/// - `Authorization` when `confirmed` is false
/// - `Store` when the force release itself fails
pub async fn emergency_reset(
    controller: &Controller,
    maintenance: &Arc<dyn MaintenanceHooks>,
    health: Option<&HealthCheckResult>,
    confirmed: bool,
) -> Result<ResetReport, ImportError> {
    if !confirmed {
        return Err(ImportError::Authorization(
            "emergency reset requires explicit confirmation".to_string(),
        ));
    }

    let was_stuck = health.map(|h| h.stuck).unwrap_or(false);
    warn!(
        was_stuck,
        failing_checks = ?health.map(|h| h.failing()),
        "Emergency reset requested"
    );

    let previous_session = controller.force_reset().await?;

    let mut cleanup_errors = Vec::new();

    let temp_files_removed = match maintenance.cleanup_temp_files().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Temp file cleanup failed during emergency reset");
            cleanup_errors.push(e.to_string());
            0
        }
    };

    let dead_processes_cleared = match maintenance.cleanup_dead_processes().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Dead process cleanup failed during emergency reset");
            cleanup_errors.push(e.to_string());
            0
        }
    };

    Ok(ResetReport {
        was_stuck,
        previous_session,
        temp_files_removed,
        dead_processes_cleared,
        cleanup_errors,
    })
}
