//! API key storage
//!
//! The key lives in `<data_dir>/api_key.json` as `{"key": "..."}`, with an
//! environment variable fallback.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::store::{self, StoreError};

/// Environment variable consulted when no key file exists
pub const API_KEY_ENV: &str = "BITNOTE_API_KEY";

const KEY_FILE: &str = "api_key.json";

pub trait KeyStore: Send + Sync {
    /// Stored credential, if any
    fn load(&self) -> Option<String>;

    fn save(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    key: Option<String>,
}

/// File-backed key store, cached after the first successful read
pub struct FileKeyStore {
    path: PathBuf,
    cached: RwLock<Option<String>>,
}

impl FileKeyStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(KEY_FILE),
            cached: RwLock::new(None),
        }
    }

    fn read_file(&self) -> Option<String> {
        match store::read_json::<KeyFile>(&self.path) {
            Ok(Some(file)) => file.key.filter(|k| !k.trim().is_empty()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Failed to read API key file");
                None
            }
        }
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Option<String> {
        if let Some(key) = self.cached.read().clone() {
            return Some(key);
        }
        let key = self
            .read_file()
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))?;
        *self.cached.write() = Some(key.clone());
        Some(key)
    }

    fn save(&self, key: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        store::write_json(&self.path, &KeyFile { key: Some(key.to_string()) })?;
        *self.cached.write() = Some(key.to_string());
        tracing::info!(prefix = %key.chars().take(4).collect::<String>(), "Saved API key");
        Ok(())
    }
}

/// In-memory key store
#[derive(Default)]
pub struct StaticKeyStore {
    key: RwLock<Option<String>>,
}

impl StaticKeyStore {
    pub fn with_key(key: &str) -> Self {
        Self {
            key: RwLock::new(Some(key.to_string())),
        }
    }
}

impl KeyStore for StaticKeyStore {
    fn load(&self) -> Option<String> {
        self.key.read().clone()
    }

    fn save(&self, key: &str) -> Result<(), StoreError> {
        *self.key.write() = Some(key.to_string());
        Ok(())
    }
}
