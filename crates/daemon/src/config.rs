// Local configuration file for the sync daemon.
//
// Global config: `~/.vibegraph/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::debounce::DebounceConfig;
use crate::sync::session::SessionConfig;
use crate::sync::writer::WriteMode;

/// Root directory for vibegraph global state: `~/.vibegraph/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".vibegraph"))
}

/// Path to the global config file: `~/.vibegraph/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Default snapshot database: `~/.vibegraph/snapshots.db`.
pub fn default_database_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("snapshots.db"))
}

// ── Global config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GlobalConfig {
    pub sync: SyncSettings,
    pub storage: StorageConfig,
}

impl GlobalConfig {
    /// Load from `~/.vibegraph/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            debounce: DebounceConfig::with_millis(self.sync.debounce_ms),
            saved_display: Duration::from_millis(self.sync.saved_display_ms),
            write_mode: self.sync.write_mode,
        }
    }

    /// Configured database path, falling back to `~/.vibegraph/snapshots.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(default_database_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.storage.poll_interval_ms)
    }
}

/// Autosave behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Quiescence window before an autosave (clamped to 100..=10000).
    pub debounce_ms: u64,
    /// How long the `saved` indicator stays before returning to `idle`.
    pub saved_display_ms: u64,
    /// `conditional_append` or `check_then_append`.
    pub write_mode: WriteMode,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { debounce_ms: 1_500, saved_display_ms: 2_000, write_mode: WriteMode::default() }
    }
}

/// Snapshot storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding `architecture_snapshots`.
    pub database_path: Option<PathBuf>,
    /// How often to look for snapshots written by other processes.
    pub poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_path: None, poll_interval_ms: 1_000 }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
