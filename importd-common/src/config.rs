//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`IMPORTD_ROOT`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! compiled defaults are used.

use crate::types::{ImportConfig, SourceKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root data folder
pub const ROOT_ENV_VAR: &str = "IMPORTD_ROOT";

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "IMPORTD_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "importd.db";

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root data folder (database, temp files)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Default import configuration (used when none is stored in the database)
    #[serde(default)]
    pub import: ImportConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive (e.g. "info", "importd=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Lock and liveness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Seconds without a heartbeat before a held lock counts as stuck (default: 300)
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    /// Upper bound for retrying "database is locked" errors (default: 5000)
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    /// Free disk space required by the health check, in MiB (default: 100)
    #[serde(default = "default_min_free_disk_mb")]
    pub min_free_disk_mb: u64,

    /// Available memory required by the health check, in MiB (default: 128)
    #[serde(default = "default_min_available_memory_mb")]
    pub min_available_memory_mb: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: default_stuck_threshold_secs(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
            min_free_disk_mb: default_min_free_disk_mb(),
            min_available_memory_mb: default_min_available_memory_mb(),
        }
    }
}

/// Periodic trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of the built-in timer that calls `tick_all`, 0 disables it (default: 60)
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Cadence of the recurring import ("hourly", "daily", ...), none = manual only
    #[serde(default)]
    pub import_cadence: Option<String>,

    /// Source used by the recurring import (default: config's source kind)
    #[serde(default)]
    pub import_source: Option<SourceKind>,

    /// Register the daily and weekly maintenance cadences (default: true)
    #[serde(default = "default_true")]
    pub maintenance: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            import_cadence: None,
            import_source: None,
            maintenance: true,
        }
    }
}

/// Request authentication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum age of a request timestamp in milliseconds (default: 1000)
    #[serde(default = "default_timestamp_window_ms")]
    pub timestamp_window_ms: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timestamp_window_ms: default_timestamp_window_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stuck_threshold_secs() -> u64 {
    300
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_min_free_disk_mb() -> u64 {
    100
}

fn default_min_available_memory_mb() -> u64 {
    128
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_timestamp_window_ms() -> i64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Locate the TOML config file
///
/// Priority: explicit path → `IMPORTD_CONFIG` → user config dir → `/etc/importd`.
/// Returns `None` when no candidate exists.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("importd").join("importd.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/importd/importd.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load TOML config from `path`
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load TOML config, falling back to defaults when missing or broken
pub fn load_or_default(explicit: Option<&Path>) -> TomlConfig {
    match locate_config_file(explicit) {
        Some(path) if path.exists() => match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{} - using compiled defaults", e);
                TomlConfig::default()
            }
        },
        Some(path) => {
            warn!("Config file not found: {} - using compiled defaults", path.display());
            TomlConfig::default()
        }
        None => {
            info!("No config file found - using compiled defaults");
            TomlConfig::default()
        }
    }
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root data folder
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml_config: &TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_value: toml_config.root_folder.clone(),
        }
    }

    /// Resolve following the priority order in the module docs
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            return path.clone();
        }

        default_root_folder()
    }
}

/// Creates the root folder and derives paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create root folder and temp folder if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.temp_path())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    /// Scratch folder for downloads, cleaned by maintenance and emergency reset
    pub fn temp_path(&self) -> PathBuf {
        self.root_folder.join("tmp")
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("importd"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/importd"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("importd"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/importd"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("importd"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\importd"))
    } else {
        PathBuf::from("./importd_data")
    }
}
