//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$ATTACHGRAB_CONFIG` (environment variable)
//! 2. `~/.config/attachgrab/config.toml` (Linux/macOS)
//!    `%APPDATA%\attachgrab\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::SortPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Mail server settings.
    pub imap: ImapConfig,
    /// Download pipeline settings.
    pub download: DownloadConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override the directory holding the journal, run state and log file.
    pub state_dir: Option<PathBuf>,
}

/// Mail server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    /// IMAP server host name.
    pub server: String,
    /// IMAPS port.
    pub port: u16,
    /// Mailbox to select before searching.
    pub mailbox: String,
    /// Raw IMAP search criteria selecting messages with attachments.
    pub search_query: String,
    /// Connect/read/write timeout in seconds.
    pub timeout_secs: u64,
}

/// Download pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Sort policy used when none is given on the command line.
    pub default_policy: SortPolicy,
    /// Maximum stored filename length in bytes.
    pub max_filename_len: usize,
    /// Attempts per message fetch before skipping it.
    pub max_fetch_attempts: u32,
    /// Pause between fetch attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            state_dir: None,
        }
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            server: "imap.gmail.com".to_string(),
            port: 993,
            mailbox: "[Gmail]/All Mail".to_string(),
            search_query: r#"X-GM-RAW "has:attachment""#.to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            default_policy: SortPolicy::None,
            max_filename_len: 150,
            max_fetch_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl ImapConfig {
    /// Network timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("ATTACHGRAB_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("attachgrab").join("config.toml"))
}

/// Return the directory holding the journal, run state and log file.
pub fn state_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.state_dir {
        return dir.clone();
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("attachgrab")
}
