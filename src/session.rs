use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Deserializer, Serialize};

use crate::client::ChatMessage;
use crate::notes::NotesWorker;

/// Text returned by `load-session` while a session has no notes
pub const NO_NOTES_PLACEHOLDER: &str = "No notes available yet";

/// One prompt/response turn. Never edited once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub prompt: String,
    pub response: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Session as persisted in sessions.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub conversations: Vec<Interaction>,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "folderId", default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

fn default_active() -> bool {
    true
}

/// RFC 3339, or a naive ISO 8601 timestamp taken as local time
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| Some(Utc.from_utc_datetime(&naive)))
}

pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

/// Compact per-session view returned with most responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub conversation_count: usize,
    pub latest_prompt: Option<String>,
    pub is_current: bool,
    #[serde(rename = "folderId")]
    pub folder_id: Option<String>,
}

/// Mutable part of a session, guarded by the session mutex
#[derive(Debug)]
pub struct SessionState {
    pub name: String,
    pub interactions: Vec<Interaction>,
    pub notes: String,
    pub active: bool,
    pub folder_id: Option<String>,
    /// Sequence number of the regeneration (or manual edit) behind `notes`
    pub(crate) notes_seq: u64,
    /// How many leading interactions the notes already cover
    pub(crate) summarized: usize,
    /// Bumped by every manual notes edit
    pub(crate) notes_version: u64,
}

/// One conversation thread with its notes and its notes worker
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    worker: NotesWorker,
}

impl Session {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                name: name.to_string(),
                interactions: Vec::new(),
                notes: String::new(),
                active: true,
                folder_id: None,
                notes_seq: 0,
                summarized: 0,
                notes_version: 0,
            }),
            worker: NotesWorker::new(),
        }
    }

    pub fn from_record(record: SessionRecord) -> Self {
        let summarized = record.conversations.len();
        Self {
            id: record.id,
            created_at: record.created_at,
            state: Mutex::new(SessionState {
                name: record.name,
                interactions: record.conversations,
                notes: record.notes,
                active: record.active,
                folder_id: record.folder_id,
                notes_seq: 0,
                summarized,
                notes_version: 0,
            }),
            worker: NotesWorker::new(),
        }
    }

    pub fn to_record(&self) -> SessionRecord {
        let state = self.state.lock();
        SessionRecord {
            id: self.id.clone(),
            name: state.name.clone(),
            conversations: state.interactions.clone(),
            notes: state.notes.clone(),
            active: state.active,
            created_at: self.created_at,
            folder_id: state.folder_id.clone(),
        }
    }

    pub fn summary(&self, is_current: bool) -> SessionSummary {
        let state = self.state.lock();
        SessionSummary {
            id: self.id.clone(),
            name: state.name.clone(),
            active: state.active,
            created_at: self.created_at,
            conversation_count: state.interactions.len(),
            latest_prompt: state.interactions.last().map(|i| i.prompt.clone()),
            is_current,
            folder_id: state.folder_id.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn worker(&self) -> &NotesWorker {
        &self.worker
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn notes(&self) -> String {
        self.state.lock().notes.clone()
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.state.lock().interactions.clone()
    }

    pub fn interaction_count(&self) -> usize {
        self.state.lock().interactions.len()
    }

    pub fn folder_id(&self) -> Option<String> {
        self.state.lock().folder_id.clone()
    }

    pub fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    pub fn set_folder(&self, folder_id: Option<String>) {
        self.state.lock().folder_id = folder_id;
    }

    pub fn append_interaction(&self, prompt: &str, response: &str) -> Interaction {
        let interaction = Interaction {
            prompt: prompt.to_string(),
            response: response.to_string(),
            timestamp: Utc::now(),
        };
        self.state.lock().interactions.push(interaction.clone());
        interaction
    }

    /// Overwrite notes from the user. Regenerations that snapshotted the
    /// session before this edit can no longer replace them.
    pub fn replace_notes(&self, notes: &str) {
        let mut state = self.state.lock();
        state.notes = notes.to_string();
        state.notes_version += 1;
    }

    /// Apply notes produced by regeneration `seq` from a snapshot taken at
    /// `notes_version`, covering the first `covered` interactions. Returns
    /// false when newer notes or a later manual edit are in place.
    pub(crate) fn apply_generated_notes(&self, seq: u64, notes_version: u64, notes: &str, covered: usize) -> bool {
        let mut state = self.state.lock();
        if seq <= state.notes_seq || notes_version != state.notes_version {
            return false;
        }
        state.notes = notes.to_string();
        state.notes_seq = seq;
        state.summarized = state.summarized.max(covered);
        true
    }

    /// Interactions as role-tagged messages, oldest first
    pub fn conversation_messages(&self) -> Vec<ChatMessage> {
        let state = self.state.lock();
        state
            .interactions
            .iter()
            .flat_map(|i| [ChatMessage::user(i.prompt.clone()), ChatMessage::assistant(i.response.clone())])
            .collect()
    }
}

/// Time-derived id (`prefix` + `YYYYmmdd_HHMMSS`), suffixed `_2`, `_3`, ...
/// when `taken` reports a collision
pub fn timestamp_id(prefix: &str, taken: impl Fn(&str) -> bool) -> String {
    let base = format!("{}{}", prefix, Local::now().format("%Y%m%d_%H%M%S"));
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_record_roundtrip() {
        let session = Session::new("20240301_090000", "Algebra");
        session.append_interaction("What is a group?", "A set with an operation.");
        session.replace_notes("<h2>Groups</h2>");
        session.set_folder(Some("folder_1".to_string()));

        let record = session.to_record();
        let json = serde_json::to_string(&record).unwrap();
        let restored = Session::from_record(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.to_record(), record);
    }

    #[test]
    fn test_record_defaults_for_sparse_json() {
        let record: SessionRecord = serde_json::from_str(r#"{"id": "x", "name": "Old"}"#).unwrap();
        assert!(record.conversations.is_empty());
        assert!(record.notes.is_empty());
        assert!(record.active);
        assert!(record.folder_id.is_none());
    }

    #[test]
    fn test_summary_fields() {
        let session = Session::new("s1", "Algebra");
        let empty = session.summary(false);
        assert_eq!(empty.conversation_count, 0);
        assert!(empty.latest_prompt.is_none());

        session.append_interaction("first", "1");
        session.append_interaction("second", "2");
        session.set_active(false);
        let summary = session.summary(true);
        assert_eq!(summary.conversation_count, 2);
        assert_eq!(summary.latest_prompt.as_deref(), Some("second"));
        assert!(summary.is_current);
        assert!(!summary.active);
    }

    #[test]
    fn test_stale_generated_notes_rejected() {
        let session = Session::new("s1", "Algebra");
        assert!(session.apply_generated_notes(2, 0, "newer", 2));
        assert!(!session.apply_generated_notes(1, 0, "older", 1));
        assert_eq!(session.notes(), "newer");
    }

    #[test]
    fn test_manual_edit_invalidates_earlier_snapshot() {
        let session = Session::new("s1", "Algebra");
        session.append_interaction("q", "a");
        let snapshot_version = session.lock().notes_version;

        session.replace_notes("<h2>Mine</h2>");
        assert!(!session.apply_generated_notes(1, snapshot_version, "<h2>Generated</h2>", 1));
        assert_eq!(session.notes(), "<h2>Mine</h2>");

        let current = session.lock().notes_version;
        assert!(session.apply_generated_notes(2, current, "<h2>Generated</h2>", 1));
        assert_eq!(session.notes(), "<h2>Generated</h2>");
    }

    #[test]
    fn test_naive_timestamps_accepted() {
        let json = r#"{
            "id": "20240301_090000",
            "name": "Old",
            "conversations": [
                {"prompt": "q", "response": "a", "timestamp": "2024-03-01T09:00:05.123456"}
            ],
            "created_at": "2024-03-01T09:00:00.123456"
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        let expected = Local
            .from_local_datetime(&NaiveDateTime::parse_from_str("2024-03-01T09:00:00.123456", "%Y-%m-%dT%H:%M:%S%.f").unwrap())
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(record.created_at, expected);
        assert_eq!(record.conversations.len(), 1);

        assert!(parse_timestamp("2024-03-01T09:00:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_timestamp_id_dedups() {
        let mut taken = HashSet::new();
        let first = timestamp_id("", |id| taken.contains(id));
        taken.insert(first.clone());
        let second = timestamp_id("", |id| taken.contains(id));

        // Same second yields a suffixed id; a later second is unique anyway.
        assert_ne!(first, second);
        assert_eq!(first.len(), 15);
    }

    #[test]
    fn test_conversation_messages_alternate_roles() {
        let session = Session::new("s1", "Algebra");
        session.append_interaction("q", "a");
        let messages = session.conversation_messages();
        assert_eq!(messages, vec![ChatMessage::user("q"), ChatMessage::assistant("a")]);
    }
}
