//! Folder tree for organising sessions.
//!
//! Folders nest through `parentId`; a folder with no parent sits at the root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::session::{deserialize_timestamp, timestamp_id};

#[derive(Error, Debug, PartialEq)]
pub enum FolderError {
    #[error("Folder {0} not found")]
    NotFound(String),
    #[error("Folder name is required")]
    EmptyName,
    #[error("Cannot move folder {0} into itself or one of its subfolders")]
    Cycle(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Folder as shown to the frontend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub children: Vec<String>,
    pub sessions: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct FolderTree {
    folders: BTreeMap<String, Folder>,
}

impl FolderTree {
    /// Build from persisted folders, re-rooting any whose parent is missing
    pub fn from_folders(folders: Vec<Folder>) -> Self {
        let mut tree = Self {
            folders: folders.into_iter().map(|f| (f.id.clone(), f)).collect(),
        };
        let orphans: Vec<String> = tree
            .folders
            .values()
            .filter(|f| f.parent_id.as_ref().is_some_and(|p| !tree.folders.contains_key(p)))
            .map(|f| f.id.clone())
            .collect();
        for id in orphans {
            tracing::warn!(folder_id = %id, "Parent folder missing, moving folder to root");
            if let Some(folder) = tree.folders.get_mut(&id) {
                folder.parent_id = None;
            }
        }
        tree
    }

    pub fn to_folders(&self) -> Vec<Folder> {
        self.folders.values().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.folders.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn create(&mut self, name: &str, parent_id: Option<&str>) -> Result<String, FolderError> {
        if name.trim().is_empty() {
            return Err(FolderError::EmptyName);
        }
        if let Some(parent) = parent_id {
            if !self.contains(parent) {
                return Err(FolderError::NotFound(parent.to_string()));
            }
        }
        let id = timestamp_id("folder_", |candidate| self.folders.contains_key(candidate));
        self.folders.insert(
            id.clone(),
            Folder {
                id: id.clone(),
                name: name.to_string(),
                parent_id: parent_id.map(str::to_string),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<(), FolderError> {
        if name.trim().is_empty() {
            return Err(FolderError::EmptyName);
        }
        let folder = self
            .folders
            .get_mut(id)
            .ok_or_else(|| FolderError::NotFound(id.to_string()))?;
        folder.name = name.to_string();
        Ok(())
    }

    /// Re-parent `id` under `new_parent` (`None` = root)
    pub fn move_folder(&mut self, id: &str, new_parent: Option<&str>) -> Result<(), FolderError> {
        if !self.contains(id) {
            return Err(FolderError::NotFound(id.to_string()));
        }
        if let Some(parent) = new_parent {
            if !self.contains(parent) {
                return Err(FolderError::NotFound(parent.to_string()));
            }
            if parent == id || self.descendants(id).contains(parent) {
                return Err(FolderError::Cycle(id.to_string()));
            }
        }
        if let Some(folder) = self.folders.get_mut(id) {
            folder.parent_id = new_parent.map(str::to_string);
        }
        Ok(())
    }

    /// Remove `id` and all of its descendants, returning every removed id
    pub fn delete(&mut self, id: &str) -> Result<BTreeSet<String>, FolderError> {
        if !self.contains(id) {
            return Err(FolderError::NotFound(id.to_string()));
        }
        let mut removed = self.descendants(id);
        removed.insert(id.to_string());
        for folder_id in &removed {
            self.folders.remove(folder_id);
        }
        Ok(removed)
    }

    /// All folders nested anywhere below `id`
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for folder in self.folders.values() {
                if folder.parent_id.as_deref() == Some(current.as_str()) && found.insert(folder.id.clone()) {
                    frontier.push(folder.id.clone());
                }
            }
        }
        found
    }

    /// Flat id → summary map; `sessions` lists (session id, folder id) pairs
    pub fn summaries<'a>(
        &self,
        sessions: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> BTreeMap<String, FolderSummary> {
        let mut out: BTreeMap<String, FolderSummary> = self
            .folders
            .values()
            .map(|f| {
                (
                    f.id.clone(),
                    FolderSummary {
                        id: f.id.clone(),
                        name: f.name.clone(),
                        parent_id: f.parent_id.clone(),
                        created_at: f.created_at,
                        children: Vec::new(),
                        sessions: Vec::new(),
                    },
                )
            })
            .collect();

        for folder in self.folders.values() {
            if let Some(parent) = folder.parent_id.as_ref().and_then(|p| out.get_mut(p)) {
                parent.children.push(folder.id.clone());
            }
        }
        for (session_id, folder_id) in sessions {
            if let Some(folder) = folder_id.and_then(|f| out.get_mut(f)) {
                folder.sessions.push(session_id.to_string());
            }
        }
        out
    }
}
