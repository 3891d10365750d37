//! Configuration and source validation
//!
//! Structural checks are side-effect free. The reachability
//! probe (HTTP HEAD or filesystem stat + open) never consumes the source, so
//! validation is safe to run while an import is in progress.

use importd_common::{ImportConfig, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ImportError;

pub const SOURCE_LOCATION_MISSING: &str = "source location missing";
pub const REMOTE_URL_MALFORMED: &str = "remote url is malformed";
pub const BATCH_SIZE_ZERO: &str = "batch size must be greater than zero";

/// Result of a validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    /// A well-formed remote URL is configured
    pub remote_ready: bool,
    /// A local path is configured and points at a file
    pub local_ready: bool,
}

impl ValidationReport {
    fn push(&mut self, error: impl Into<String>) {
        self.valid = false;
        self.errors.push(error.into());
    }
}

/// True for absolute http(s) URLs with a host
pub fn is_well_formed_url(raw: &str) -> bool {
    match reqwest::Url::parse(raw.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

async fn is_local_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Validates import configuration and probes sources
#[derive(Clone)]
pub struct Validator {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl Validator {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            probe_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Structural validation against the config's own default source
    pub async fn validate_config(&self, config: &ImportConfig) -> ValidationReport {
        self.validate_config_for(config.source_kind, config).await
    }

    /// Structural validation for a run reading from `kind`
    pub async fn validate_config_for(&self, kind: SourceKind, config: &ImportConfig) -> ValidationReport {
        let remote_url = config.location(SourceKind::Remote);
        let local_path = config
            .local_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty());

        let remote_ready = remote_url.as_deref().map(is_well_formed_url).unwrap_or(false);
        let local_ready = match local_path {
            Some(path) => is_local_file(path).await,
            None => false,
        };

        let mut report = ValidationReport {
            valid: true,
            errors: Vec::new(),
            remote_ready,
            local_ready,
        };

        match config.location(kind) {
            None => report.push(SOURCE_LOCATION_MISSING),
            Some(url) if kind == SourceKind::Remote && !is_well_formed_url(&url) => {
                report.push(REMOTE_URL_MALFORMED)
            }
            Some(_) => {}
        }

        if config.batch_size == 0 {
            report.push(BATCH_SIZE_ZERO);
        }

        for (index, mapping) in config.mappings.iter().enumerate() {
            if mapping.column.trim().is_empty() || mapping.field.trim().is_empty() {
                report.push(format!("mapping rule {} is incomplete", index + 1));
            }
        }

        report
    }

    /// Structural validation plus a reachability probe of `kind`
    pub async fn validate_source(&self, kind: SourceKind, config: &ImportConfig) -> ValidationReport {
        let mut report = self.validate_config_for(kind, config).await;
        if !report.valid {
            return report;
        }

        if let Err(e) = self.probe(kind, config).await {
            report.push(e.to_string());
            match kind {
                SourceKind::Remote => report.remote_ready = false,
                SourceKind::Local => report.local_ready = false,
            }
        }

        report
    }

    /// Check the source can be reached without reading it
    ///
    /// # Errors
    /// `SourceUnavailable` with a readable reason
    pub async fn probe(&self, kind: SourceKind, config: &ImportConfig) -> Result<(), ImportError> {
        let location = config
            .location(kind)
            .ok_or_else(|| ImportError::SourceUnavailable(SOURCE_LOCATION_MISSING.to_string()))?;

        match kind {
            SourceKind::Remote => {
                let response = self
                    .client
                    .head(location.trim())
                    .timeout(self.probe_timeout)
                    .send()
                    .await
                    .map_err(|e| ImportError::SourceUnavailable(format!("{}: {}", location, e)))?;

                let status = response.status();
                // Some file hosts refuse HEAD but serve GET
                if status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
                    Ok(())
                } else {
                    Err(ImportError::SourceUnavailable(format!(
                        "{} responded with {}",
                        location, status
                    )))
                }
            }
            SourceKind::Local => {
                let path = Path::new(&location);
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| ImportError::SourceUnavailable(format!("{}: {}", location, e)))?;
                if !metadata.is_file() {
                    return Err(ImportError::SourceUnavailable(format!(
                        "{} is not a file",
                        location
                    )));
                }
                tokio::fs::File::open(path)
                    .await
                    .map_err(|e| ImportError::SourceUnavailable(format!("{}: {}", location, e)))?;
                Ok(())
            }
        }
    }
}
