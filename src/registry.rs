//! Session Registry
//!
//! Owns every `Session`, the active-session pointer and the folder tree.
//! Each mutating operation persists the full registry immediately; a failed
//! save is logged and the in-memory state stays authoritative.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::folders::{FolderError, FolderSummary, FolderTree};
use crate::session::{timestamp_id, Session, SessionRecord, SessionSummary};
use crate::store::{SessionStore, StoreError};

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error("Session name is required")]
    EmptyName,
    #[error(transparent)]
    Folder(#[from] FolderError),
}

pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, Arc<Session>>>,
    active: RwLock<Option<String>>,
    folders: RwLock<FolderTree>,
    store: SessionStore,
    /// Serializes snapshot + write so the newest state is always written last
    save_lock: Mutex<()>,
}

impl SessionRegistry {
    /// Registry backed by `store`, populated from disk
    pub fn open(store: SessionStore) -> Self {
        let registry = Self {
            sessions: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            folders: RwLock::new(FolderTree::default()),
            store,
            save_lock: Mutex::new(()),
        };
        registry.load();
        registry
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Replace in-memory state with what is on disk. Unreadable files degrade
    /// to an empty registry. Returns the number of sessions loaded.
    pub fn load(&self) -> usize {
        let records = match self.store.load_sessions() {
            Ok(records) => records,
            Err(e) => {
                error!(path = ?self.store.sessions_path(), error = %e, "Failed to load sessions, starting empty");
                Vec::new()
            }
        };
        let folders = match self.store.load_folders() {
            Ok(folders) => folders,
            Err(e) => {
                error!(path = ?self.store.folders_path(), error = %e, "Failed to load folders, starting empty");
                Vec::new()
            }
        };

        let loaded: BTreeMap<String, Arc<Session>> = records
            .into_iter()
            .map(|record| (record.id.clone(), Arc::new(Session::from_record(record))))
            .collect();
        let count = loaded.len();

        let previous = std::mem::replace(&mut *self.sessions.write(), loaded);
        for session in previous.values() {
            session.worker().shutdown();
        }
        *self.folders.write() = FolderTree::from_folders(folders);
        *self.active.write() = None;

        info!(sessions = count, "Loaded sessions");
        count
    }

    /// Write every session's full state
    pub fn save(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock();
        let records: Vec<SessionRecord> = self.sessions.read().values().map(|s| s.to_record()).collect();
        self.store.save_sessions(&records)
    }

    pub fn save_folders(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock();
        let folders = self.folders.read().to_folders();
        self.store.save_folders(&folders)
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            error!(error = %e, "Failed to save sessions");
        }
    }

    fn persist_folders(&self) {
        if let Err(e) = self.save_folders() {
            error!(error = %e, "Failed to save folders");
        }
    }

    /// Create a session, make it active and persist. `None` picks a default
    /// name; a blank name is rejected. An unknown folder places it at the root.
    pub fn create(&self, name: Option<&str>, folder_id: Option<&str>) -> Result<String, RegistryError> {
        if name.is_some_and(|n| n.trim().is_empty()) {
            return Err(RegistryError::EmptyName);
        }
        let folder_id = match folder_id {
            Some(f) if self.folders.read().contains(f) => Some(f.to_string()),
            Some(f) => {
                warn!(folder_id = %f, "Folder not found, creating session at root");
                None
            }
            None => None,
        };

        let id = {
            let mut sessions = self.sessions.write();
            let id = timestamp_id("", |candidate| sessions.contains_key(candidate));
            let name = name.map(str::to_string).unwrap_or_else(|| format!("Session {}", id));
            let session = Session::new(&id, &name);
            session.set_folder(folder_id);
            sessions.insert(id.clone(), Arc::new(session));
            id
        };
        *self.active.write() = Some(id.clone());
        info!(session_id = %id, "Created session");

        self.persist();
        Ok(id)
    }

    /// Deactivate the active session, if any. Returns its id.
    pub fn end_active(&self) -> Option<String> {
        let id = self.active.write().take()?;
        if let Some(session) = self.get(&id) {
            session.set_active(false);
        }
        info!(session_id = %id, "Ended session");
        self.persist();
        Some(id)
    }

    /// Remove a session permanently. False if `id` is unknown.
    pub fn delete(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        session.worker().shutdown();
        {
            let mut active = self.active.write();
            if active.as_deref() == Some(id) {
                *active = None;
            }
        }
        info!(session_id = %id, "Deleted session");
        self.persist();
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Whether this exact session instance is still registered
    pub fn contains(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .read()
            .get(session.id())
            .is_some_and(|registered| Arc::ptr_eq(registered, session))
    }

    pub fn active_id(&self) -> Option<String> {
        self.active.read().clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn list_summaries(&self) -> BTreeMap<String, SessionSummary> {
        let active = self.active_id();
        self.sessions
            .read()
            .iter()
            .map(|(id, session)| (id.clone(), session.summary(active.as_deref() == Some(id.as_str()))))
            .collect()
    }

    /// Overwrite a session's notes directly and persist
    pub fn update_notes(&self, id: &str, notes: &str) -> Result<(), RegistryError> {
        let session = self.get(id).ok_or_else(|| RegistryError::SessionNotFound(id.to_string()))?;
        session.replace_notes(notes);
        self.persist();
        Ok(())
    }

    /// Append a prompt/response turn to a session and persist. `None` if the
    /// session is unknown.
    pub fn record_interaction(&self, id: &str, prompt: &str, response: &str) -> Option<Arc<Session>> {
        let session = self.get(id)?;
        session.append_interaction(prompt, response);
        self.persist();
        Some(session)
    }

    // ============ FOLDERS ============

    pub fn folder_summaries(&self) -> BTreeMap<String, FolderSummary> {
        let placement: Vec<(String, Option<String>)> = self
            .sessions
            .read()
            .values()
            .map(|s| (s.id().to_string(), s.folder_id()))
            .collect();
        self.folders
            .read()
            .summaries(placement.iter().map(|(s, f)| (s.as_str(), f.as_deref())))
    }

    pub fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String, RegistryError> {
        let id = self.folders.write().create(name, parent_id)?;
        info!(folder_id = %id, "Created folder");
        self.persist_folders();
        Ok(id)
    }

    pub fn rename_folder(&self, id: &str, name: &str) -> Result<(), RegistryError> {
        self.folders.write().rename(id, name)?;
        self.persist_folders();
        Ok(())
    }

    pub fn move_folder(&self, id: &str, parent_id: Option<&str>) -> Result<(), RegistryError> {
        self.folders.write().move_folder(id, parent_id)?;
        self.persist_folders();
        Ok(())
    }

    /// Delete a folder subtree; its sessions move to the root
    pub fn delete_folder(&self, id: &str) -> Result<(), RegistryError> {
        let removed = self.folders.write().delete(id)?;
        for session in self.sessions.read().values() {
            if session.folder_id().is_some_and(|f| removed.contains(&f)) {
                session.set_folder(None);
            }
        }
        info!(folder_id = %id, removed = removed.len(), "Deleted folder");
        self.persist_folders();
        self.persist();
        Ok(())
    }

    /// Move a session into `folder_id` (`None` = root)
    pub fn move_session(&self, session_id: &str, folder_id: Option<&str>) -> Result<(), RegistryError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))?;
        if let Some(folder) = folder_id {
            if !self.folders.read().contains(folder) {
                return Err(FolderError::NotFound(folder.to_string()).into());
            }
        }
        session.set_folder(folder_id.map(str::to_string));
        self.persist();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open(dir: &tempfile::TempDir) -> SessionRegistry {
        SessionRegistry::open(SessionStore::new(dir.path()))
    }

    #[test]
    fn test_create_marks_active_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);

        let id = registry.create(Some("Algebra"), None).unwrap();
        assert_eq!(registry.active_id().as_deref(), Some(id.as_str()));
        assert!(registry.store().sessions_path().exists());

        let summaries = registry.list_summaries();
        assert_eq!(summaries[&id].name, "Algebra");
        assert!(summaries[&id].is_current);
    }

    #[test]
    fn test_create_defaults_name_and_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);

        let id = registry.create(None, None).unwrap();
        assert_eq!(registry.get(&id).unwrap().name(), format!("Session {}", id));
        assert_eq!(registry.create(Some("   "), None), Err(RegistryError::EmptyName));
    }

    #[test]
    fn test_ids_unique_within_same_second() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let a = registry.create(Some("A"), None).unwrap();
        let b = registry.create(Some("B"), None).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_id(), Some(b));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let id = registry.create(Some("Algebra"), None).unwrap();
        let session = registry.get(&id).unwrap();
        session.append_interaction("What is a group?", "A set with an associative operation.");
        registry.update_notes(&id, "<h2>Groups</h2>").unwrap();
        let expected = session.to_record();

        let reopened = open(&dir);
        let restored = reopened.get(&id).unwrap().to_record();
        assert_eq!(restored, expected);
        assert_eq!(reopened.active_id(), None);
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sessions.json"), "[{\"id\": ").unwrap();
        let registry = open(&dir);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_loads_naive_timestamp_file_and_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = r#"[{"id": "20240301_090000", "name": "Algebra", "conversations": [{"prompt": "What is a group?", "response": "A set with an operation.", "timestamp": "2024-03-01T09:00:05.123456"}], "notes": "<h2>Groups</h2>", "active": true, "created_at": "2024-03-01T09:00:00.123456"}]"#;
        fs::write(dir.path().join("sessions.json"), legacy).unwrap();

        let registry = open(&dir);
        assert_eq!(registry.len(), 1);
        let session = registry.get("20240301_090000").unwrap();
        assert_eq!(session.interaction_count(), 1);
        assert_eq!(session.notes(), "<h2>Groups</h2>");

        let new_id = registry.create(Some("New"), None).unwrap();
        let on_disk = SessionStore::new(dir.path()).load_sessions().unwrap();
        let ids: Vec<_> = on_disk.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"20240301_090000"));
        assert!(ids.contains(&new_id.as_str()));
    }

    #[test]
    fn test_delete_clears_active_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let id = registry.create(Some("Algebra"), None).unwrap();

        assert!(registry.delete(&id));
        assert!(registry.active_id().is_none());
        assert!(registry.get(&id).is_none());
        assert!(!registry.delete(&id));
        assert!(open(&dir).is_empty());
    }

    #[test]
    fn test_end_active_deactivates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let id = registry.create(Some("Algebra"), None).unwrap();

        assert_eq!(registry.end_active(), Some(id.clone()));
        assert!(registry.end_active().is_none());
        let summary = &registry.list_summaries()[&id];
        assert!(!summary.active);
        assert!(!summary.is_current);
    }

    #[test]
    fn test_update_notes_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        assert_eq!(
            registry.update_notes("nope", "x"),
            Err(RegistryError::SessionNotFound("nope".into()))
        );
    }

    #[test]
    fn test_contains_is_identity_based() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let id = registry.create(Some("Algebra"), None).unwrap();
        let session = registry.get(&id).unwrap();
        assert!(registry.contains(&session));

        registry.load();
        assert!(!registry.contains(&session));
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn test_delete_folder_moves_sessions_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let math = registry.create_folder("Math", None).unwrap();
        let id = registry.create(Some("Algebra"), Some(math.as_str())).unwrap();
        assert_eq!(registry.folder_summaries()[&math].sessions, vec![id.clone()]);

        registry.delete_folder(&math).unwrap();
        assert!(registry.get(&id).unwrap().folder_id().is_none());

        let reopened = open(&dir);
        assert!(reopened.folder_summaries().is_empty());
        assert!(reopened.get(&id).unwrap().folder_id().is_none());
    }

    #[test]
    fn test_move_session_validates_folder() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let id = registry.create(Some("Algebra"), None).unwrap();

        assert!(matches!(
            registry.move_session(&id, Some("folder_missing")),
            Err(RegistryError::Folder(FolderError::NotFound(_)))
        ));
        let math = registry.create_folder("Math", None).unwrap();
        registry.move_session(&id, Some(math.as_str())).unwrap();
        assert_eq!(registry.get(&id).unwrap().folder_id(), Some(math));
    }
}
