//! Persistence Layer
//!
//! JSON files under the data directory, replaced atomically: contents go to a
//! `.tmp` sibling first and are renamed over the canonical file only once fully
//! written, so a crash never leaves a truncated file behind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::folders::Folder;
use crate::session::SessionRecord;

const SESSIONS_FILE: &str = "sessions.json";
const FOLDERS_FILE: &str = "folders.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A fully written temporary file waiting to replace its target.
///
/// Dropping it without `commit` removes the temporary file and leaves the
/// target untouched.
pub struct StagedWrite {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    /// Write `contents` to the `.tmp` sibling of `target` and sync it to disk
    pub fn stage(target: &Path, contents: &[u8]) -> Result<Self, StoreError> {
        let tmp = tmp_path(target);
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(Self {
            tmp,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    /// Rename the temporary file over the target
    pub fn commit(mut self) -> Result<(), StoreError> {
        fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Atomic write: write to a .tmp sibling then rename into place.
pub fn atomic_write(path: &Path, contents: &str) -> Result<(), StoreError> {
    StagedWrite::stage(path, contents.as_bytes())?.commit()
}

/// Read a JSON file, `None` if it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Serialize and atomically replace a JSON file
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value)?;
    atomic_write(path, &content)
}

/// File locations for everything the registry persists
#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_FILE)
    }

    pub fn folders_path(&self) -> PathBuf {
        self.data_dir.join(FOLDERS_FILE)
    }

    pub fn load_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(read_json(&self.sessions_path())?.unwrap_or_default())
    }

    pub fn save_sessions(&self, records: &[SessionRecord]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        write_json(&self.sessions_path(), records)
    }

    pub fn load_folders(&self) -> Result<Vec<Folder>, StoreError> {
        Ok(read_json(&self.folders_path())?.unwrap_or_default())
    }

    pub fn save_folders(&self, folders: &[Folder]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        write_json(&self.folders_path(), folders)
    }
}
