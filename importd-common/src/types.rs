//! Import configuration types
//!
//! Shared by the HTTP gateway, the TOML config file and the coordinator.
//! An `ImportConfig` is immutable once a run starts: the controller takes
//! an owned copy at `start`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where an import reads its records from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTTP(S) download of the source file
    Remote,
    /// File on the local filesystem
    Local,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Remote => "remote",
            SourceKind::Local => "local",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "dropbox" | "url" => Ok(SourceKind::Remote),
            "local" | "file" => Ok(SourceKind::Local),
            other => Err(format!("Unknown source kind: {}", other)),
        }
    }
}

/// Maps one source column onto one target field of the content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Column name in the source header
    pub column: String,
    /// Field name in the content store
    pub field: String,
}

/// Import job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Default source used by scheduled runs (default: local)
    #[serde(default = "default_source_kind")]
    pub source_kind: SourceKind,

    /// Remote source URL (http or https)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Local source file path
    #[serde(default)]
    pub local_path: Option<PathBuf>,

    /// Column → field mapping rules
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,

    /// Records per batch (default: 25)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Execution time budget in seconds, 0 = unlimited (default: 0)
    #[serde(default)]
    pub max_execution_secs: u64,

    /// Total failed rows that turn the run into a failure (default: 100)
    #[serde(default = "default_row_failure_threshold")]
    pub row_failure_threshold: u64,

    /// Consecutive failed rows that turn the run into a failure (default: 25)
    #[serde(default = "default_consecutive_failure_threshold")]
    pub consecutive_failure_threshold: u64,

    /// First line of the source is a header (default: true)
    #[serde(default = "default_skip_header")]
    pub skip_header: bool,
}

impl ImportConfig {
    /// Source location configured for `kind`, rendered for logs and errors
    pub fn location(&self, kind: SourceKind) -> Option<String> {
        match kind {
            SourceKind::Remote => self
                .remote_url
                .as_ref()
                .filter(|u| !u.trim().is_empty())
                .cloned(),
            SourceKind::Local => self
                .local_path
                .as_ref()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.display().to_string()),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source_kind: default_source_kind(),
            remote_url: None,
            local_path: None,
            mappings: Vec::new(),
            batch_size: default_batch_size(),
            max_execution_secs: 0,
            row_failure_threshold: default_row_failure_threshold(),
            consecutive_failure_threshold: default_consecutive_failure_threshold(),
            skip_header: default_skip_header(),
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::Local
}

fn default_batch_size() -> usize {
    25
}

fn default_row_failure_threshold() -> u64 {
    100
}

fn default_consecutive_failure_threshold() -> u64 {
    25
}

fn default_skip_header() -> bool {
    true
}
