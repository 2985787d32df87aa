//! Backend configuration
//!
//! Defaults, overlaid by `<data_dir>/config/preferences.json`, overlaid by
//! command-line flags and environment variables in the binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory name under the platform data dir
const APP_DIR_NAME: &str = "BitNote";

/// Default chat / summarizer endpoint
pub const DEFAULT_API_URL: &str = "https://bitnote-a97b19c0e48d.herokuapp.com/response_router";

/// Default system instruction for chat completions
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("App data directory not found")]
    NoAppDataDir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Holds sessions.json, folders.json, api_key.json and config/
    pub data_dir: PathBuf,
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub summarizer_timeout_secs: u64,
    /// Context budget for chat history (estimated tokens)
    pub max_tokens: usize,
    pub worker_pool_size: usize,
    /// How long a notes regeneration waits before it may start
    pub debounce_ms: u64,
    pub clipboard_enabled: bool,
    /// Program plus arguments that print the clipboard to stdout
    pub clipboard_command: Option<Vec<String>>,
    pub system_prompt: String,
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().unwrap_or_else(|_| PathBuf::from(".")),
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 60,
            summarizer_timeout_secs: 120,
            max_tokens: 4000,
            worker_pool_size: 4,
            debounce_ms: 250,
            clipboard_enabled: true,
            clipboard_command: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn preferences_path(data_dir: &Path) -> PathBuf {
        data_dir.join("config").join("preferences.json")
    }

    /// Load preferences for `data_dir`, writing a default file on first run.
    ///
    /// A malformed preferences file is logged and replaced by defaults in memory
    /// (the file itself is left alone so the user can fix it).
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let prefs_path = Self::preferences_path(data_dir);

        if !prefs_path.exists() {
            let config = Self {
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            };
            if let Some(parent) = prefs_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&prefs_path, serde_json::to_string_pretty(&config.persisted())?)?;
            return Ok(config);
        }

        let content = fs::read_to_string(&prefs_path)?;
        let mut config = match serde_json::from_str::<BackendConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = ?prefs_path, error = %e, "Failed to parse preferences, using defaults");
                Self::default()
            }
        };
        // The data dir is where we found the file, never what it claims.
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    /// Serializable view without the machine-specific data dir
    fn persisted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("data_dir");
        }
        value
    }
}

/// Platform data directory for the backend, e.g. `~/.local/share/BitNote`
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir().ok_or(ConfigError::NoAppDataDir)?;
    Ok(base.join(APP_DIR_NAME))
}
