//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STRATA_SERVER_URL=https://sync.example.com/api                     │
//! │     STRATA_SYNC_MODE=manual                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/strata/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.strata.strata/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Auto, auto-generated device_id, built-in table list      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Core shed tablet"
//!
//! [server]
//! base_url = "https://sync.example.com/api"
//! api_token = "..."
//!
//! [sync]
//! mode = "auto"            # auto | manual | offline
//! batch_size = 100
//! pull_interval_secs = 300
//!
//! [scope]
//! program_ids = ["DP-2024-01"]
//!
//! [[tables]]               # appended to / overriding the built-in list
//! name = "Lookup_CoreSize"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use strata_core::{SyncContext, TableEntry, TableRegistry};

// =============================================================================
// Sync Mode
// =============================================================================

/// How the agent schedules sync cycles.
///
/// ```text
/// AUTO     timer + manual triggers
/// MANUAL   manual triggers only
/// OFFLINE  sync disabled, local edits still journaled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Periodic cycles plus manual triggers.
    #[default]
    Auto,

    /// Only manual triggers start a cycle.
    Manual,

    /// Sync disabled - offline mode only.
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    /// Returns true if the periodic timer runs.
    pub fn is_periodic(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "manual" | "on_demand" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    #[serde(default = "generate_device_id")]
    pub id: String,

    /// Human-readable device name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn generate_device_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_device_name() -> String {
    "Field Device".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: generate_device_id(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// Where and how to reach the sync endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL; `/sync/pull` and `/sync/push` are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout (seconds). Full-table pulls can be large.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            base_url: default_base_url(),
            api_token: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Scheduling mode for this device.
    #[serde(default)]
    pub mode: SyncMode,

    /// Maximum pending changes sent per push.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Interval between periodic cycles (seconds).
    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: u64,

    /// Push even with an empty journal, to receive server changes.
    #[serde(default = "default_true")]
    pub push_when_empty: bool,

    /// Follow-up pushes allowed when the server reports `partial`.
    #[serde(default = "default_max_partial_rounds")]
    pub max_partial_rounds: u32,

    /// Maximum attempts per remote call. Set to 0 to retry until
    /// `max_retry_elapsed_secs` runs out.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Total time spent retrying one remote call (seconds).
    #[serde(default = "default_max_retry_elapsed")]
    pub max_retry_elapsed_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> u32 {
    100
}
fn default_pull_interval() -> u64 {
    300
}
fn default_max_partial_rounds() -> u32 {
    10
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}
fn default_max_retry_elapsed() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            batch_size: default_batch_size(),
            pull_interval_secs: default_pull_interval(),
            push_when_empty: default_true(),
            max_partial_rounds: default_max_partial_rounds(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retry_elapsed_secs: default_max_retry_elapsed(),
        }
    }
}

// =============================================================================
// Scope Settings
// =============================================================================

/// Default scoping context, used until the device stores its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeSettings {
    #[serde(default)]
    pub program_ids: Vec<String>,
    #[serde(default)]
    pub collar_ids: Vec<String>,
}

impl ScopeSettings {
    pub fn to_context(&self) -> SyncContext {
        SyncContext {
            selected_program_ids: self.program_ids.clone(),
            selected_collar_ids: self.collar_ids.clone(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Server endpoint settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Default scoping context.
    #[serde(default)]
    pub scope: ScopeSettings,

    /// Extra or overriding table entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableEntry>,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let url = url::Url::parse(&self.server.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.base_url
            )));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.pull_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "pull_interval_secs must be greater than 0".into(),
            ));
        }

        // Surface registry problems (duplicates, empty fields) at load time
        self.registry()?;

        Ok(())
    }

    /// Applies `STRATA_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("STRATA_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = lookup("STRATA_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(url) = lookup("STRATA_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        if let Some(token) = lookup("STRATA_API_TOKEN") {
            self.server.api_token = Some(token);
        }

        if let Some(mode) = lookup("STRATA_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(secs) = lookup("STRATA_PULL_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.pull_interval_secs = s,
                Err(_) => warn!(value = %secs, "Invalid STRATA_PULL_INTERVAL_SECS"),
            }
        }

        if let Some(size) = lookup("STRATA_BATCH_SIZE") {
            match size.parse::<u32>() {
                Ok(s) => self.sync.batch_size = s,
                Err(_) => warn!(value = %size, "Invalid STRATA_BATCH_SIZE"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "strata", "strata")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Built-in table registry extended with this config's `[[tables]]`.
    pub fn registry(&self) -> SyncResult<TableRegistry> {
        let mut registry = TableRegistry::builtin()?;
        registry.extend(self.tables.iter().cloned())?;
        Ok(registry)
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.sync.pull_interval_secs)
    }

    pub fn default_context(&self) -> SyncContext {
        self.scope.to_context()
    }
}
