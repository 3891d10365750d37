//! Health evaluation result (derived, never persisted)

use serde::{Deserialize, Serialize};

/// Single named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub ok: bool,
    pub detail: String,
}

impl HealthCheck {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Outcome of `HealthMonitor::check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub memory_ok: HealthCheck,
    pub disk_space_ok: HealthCheck,
    pub permissions_ok: HealthCheck,
    /// Execution time budget is unlimited or at least five minutes
    pub time_ok: HealthCheck,
    pub network_ok: HealthCheck,
    /// Lock and progress records agree
    pub import_locks_ok: HealthCheck,
    pub no_stuck_processes: HealthCheck,
    /// All checks pass
    pub healthy: bool,
    /// A held lock missed its heartbeat for longer than the threshold
    pub stuck: bool,
}

impl HealthCheckResult {
    /// (name, check) pairs in display order
    pub fn checks(&self) -> [(&'static str, &HealthCheck); 7] {
        [
            ("memory_ok", &self.memory_ok),
            ("disk_space_ok", &self.disk_space_ok),
            ("permissions_ok", &self.permissions_ok),
            ("time_ok", &self.time_ok),
            ("network_ok", &self.network_ok),
            ("import_locks_ok", &self.import_locks_ok),
            ("no_stuck_processes", &self.no_stuck_processes),
        ]
    }

    /// Names of failing checks
    pub fn failing(&self) -> Vec<&'static str> {
        self.checks()
            .iter()
            .filter(|(_, check)| !check.ok)
            .map(|(name, _)| *name)
            .collect()
    }
}
