//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use ht_core::{DEFAULT_TERMINAL_EMULATORS, PipelineConfig};
use ht_db::BatchPolicy;
use serde::{Deserialize, Serialize};

/// Backend the daemon records into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    /// `SQLite` database with batched transactions.
    #[default]
    Sqlite,
    /// Append-only JSON Lines file.
    Jsonl,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Path to the flat activity log used by the `jsonl` backend.
    pub log_path: PathBuf,
    pub storage: Storage,
    /// Control socket location.
    pub socket_path: PathBuf,
    pub terminal_debounce_ms: u64,
    pub general_debounce_ms: u64,
    pub terminal_emulators: Vec<String>,
    /// Rows per transaction before a commit is forced.
    pub commit_threshold: usize,
    /// Seconds between commits while rows are pending.
    pub commit_interval_secs: u64,
    pub queue_capacity: usize,
    /// Detect idleness in-process instead of relying on an external idle daemon.
    pub internal_idle_timer: bool,
    pub idle_threshold_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("ht.db"),
            log_path: data_dir.join("activity.jsonl"),
            storage: Storage::default(),
            socket_path: default_socket_path(),
            terminal_debounce_ms: 3000,
            general_debounce_ms: 500,
            terminal_emulators: DEFAULT_TERMINAL_EMULATORS
                .iter()
                .map(ToString::to_string)
                .collect(),
            commit_threshold: 100,
            commit_interval_secs: 5,
            queue_capacity: 100,
            internal_idle_timer: false,
            idle_threshold_secs: 900,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (HT_*)
        figment = figment.merge(Env::prefixed("HT_"));

        figment.extract()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            terminal_debounce: millis(self.terminal_debounce_ms),
            general_debounce: millis(self.general_debounce_ms),
            terminal_emulators: self.terminal_emulators.clone(),
        }
    }

    pub const fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            max_rows: self.commit_threshold,
            max_age: Duration::from_secs(self.commit_interval_secs),
        }
    }

    /// In-process idle threshold, when the internal idle timer is enabled.
    pub fn idle_threshold(&self) -> Option<chrono::Duration> {
        self.internal_idle_timer.then(|| {
            i64::try_from(self.idle_threshold_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX)
        })
    }
}

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Returns the platform-specific config directory for ht.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ht"))
}

/// Returns the platform-specific data directory for ht.
///
/// On Linux: `~/.local/share/ht`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ht"))
}

/// `$XDG_RUNTIME_DIR/ht.sock`, or the temp dir when there is no runtime dir.
fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ht.sock")
}
