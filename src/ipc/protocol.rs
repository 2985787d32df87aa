//! Wire types for the line protocol
//!
//! Input: one JSON object per line, routed by its `command` field
//! (`send-prompt` when absent). Output: one `Response` envelope per line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::client::{ChatMessage, ServiceError};
use crate::folders::{FolderError, FolderSummary};
use crate::registry::RegistryError;
use crate::session::SessionSummary;
use crate::store::StoreError;

// ============ COMMANDS ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SendPrompt,
    StartSession,
    EndSession,
    LoadSession,
    DeleteSession,
    GetSessions,
    UpdateNotes,
    RefreshMemory,
    SetApiKey,
    CheckApiKey,
    CreateFolder,
    RenameFolder,
    MoveFolder,
    DeleteFolder,
    MoveSession,
}

impl CommandKind {
    pub const ALL: [CommandKind; 15] = [
        CommandKind::SendPrompt,
        CommandKind::StartSession,
        CommandKind::EndSession,
        CommandKind::LoadSession,
        CommandKind::DeleteSession,
        CommandKind::GetSessions,
        CommandKind::UpdateNotes,
        CommandKind::RefreshMemory,
        CommandKind::SetApiKey,
        CommandKind::CheckApiKey,
        CommandKind::CreateFolder,
        CommandKind::RenameFolder,
        CommandKind::MoveFolder,
        CommandKind::DeleteFolder,
        CommandKind::MoveSession,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::SendPrompt => "send-prompt",
            CommandKind::StartSession => "start-session",
            CommandKind::EndSession => "end-session",
            CommandKind::LoadSession => "load-session",
            CommandKind::DeleteSession => "delete-session",
            CommandKind::GetSessions => "get-sessions",
            CommandKind::UpdateNotes => "update-notes",
            CommandKind::RefreshMemory => "refresh-memory",
            CommandKind::SetApiKey => "set-api-key",
            CommandKind::CheckApiKey => "check-api-key",
            CommandKind::CreateFolder => "create-folder",
            CommandKind::RenameFolder => "rename-folder",
            CommandKind::MoveFolder => "move-folder",
            CommandKind::DeleteFolder => "delete-folder",
            CommandKind::MoveSession => "move-session",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// One parsed input line
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub request_id: String,
    pub body: Value,
}

impl Command {
    /// Parse the JSON object on `line`. `request_id` is used when the line
    /// carries no `requestId` of its own.
    pub fn parse(line: &str, request_id: String) -> Result<Self, (CommandError, String)> {
        let body: Value = serde_json::from_str(line)
            .map_err(|e| (CommandError::Validation(format!("Invalid JSON: {}", e)), request_id.clone()))?;
        if !body.is_object() {
            return Err((
                CommandError::Validation("Command must be a JSON object".to_string()),
                request_id,
            ));
        }

        let request_id = body
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(request_id);
        let name = body
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or(CommandKind::SendPrompt.name());
        let Some(kind) = CommandKind::parse(name) else {
            return Err((CommandError::Validation("Invalid command".to_string()), request_id));
        };

        Ok(Self { kind, request_id, body })
    }

    /// Deserialize the command's fields into `T`
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        T::deserialize(&self.body)
            .map_err(|e| CommandError::Validation(format!("Invalid {} parameters: {}", self.kind.name(), e)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPromptParams {
    #[serde(default)]
    pub prompt: String,
    pub session_id: Option<String>,
    pub use_clipboard: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionParams {
    pub name: Option<String>,
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotesParams {
    pub session_id: String,
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct SetApiKeyParams {
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderParams {
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameFolderParams {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFolderParams {
    pub id: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSessionParams {
    pub session_id: String,
    pub folder_id: Option<String>,
}

// ============ ERRORS ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Service,
    Persistence,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Service(#[from] ServiceError),
    #[error("Failed to save: {0}")]
    Persistence(#[from] StoreError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Validation(_) => ErrorKind::Validation,
            CommandError::NotFound(_) => ErrorKind::NotFound,
            CommandError::Service(_) => ErrorKind::Service,
            CommandError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::SessionNotFound(_) | RegistryError::Folder(FolderError::NotFound(_)) => {
                CommandError::NotFound(e.to_string())
            }
            RegistryError::EmptyName | RegistryError::Folder(_) => CommandError::Validation(e.to_string()),
        }
    }
}

// ============ RESPONSES ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ChatResponse,
    /// Unsolicited push from the notes synchronizer
    NotesUpdate,
}

/// Output envelope. Only `success` is always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<BTreeMap<String, SessionSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<BTreeMap<String, FolderSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageType>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "folderId", skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<ChatMessage>>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "hasKey", skip_serializing_if = "Option::is_none")]
    pub has_key: Option<bool>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: &CommandError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::default()
        }
    }

    pub fn notes_update(
        session_id: &str,
        notes: String,
        sessions: BTreeMap<String, SessionSummary>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            success: true,
            response: Some(notes),
            sessions: Some(sessions),
            kind: Some(MessageType::NotesUpdate),
            session_id: Some(session_id.to_string()),
            request_id,
            ..Self::default()
        }
    }

    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.response = Some(text.into());
        self
    }

    pub fn with_sessions(mut self, sessions: BTreeMap<String, SessionSummary>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_folders(mut self, folders: BTreeMap<String, FolderSummary>) -> Self {
        self.folders = Some(folders);
        self
    }

    pub fn with_kind(mut self, kind: MessageType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_session_id(mut self, id: Option<String>) -> Self {
        self.session_id = id;
        self
    }

    pub fn with_folder_id(mut self, id: String) -> Self {
        self.folder_id = Some(id);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.conversation_history = Some(history);
        self
    }

    pub fn with_has_key(mut self, has_key: bool) -> Self {
        self.has_key = Some(has_key);
        self
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_defaults_to_send_prompt() {
        let command = Command::parse(r#"{"prompt": "hi"}"#, "r0".into()).unwrap();
        assert_eq!(command.kind, CommandKind::SendPrompt);
        assert_eq!(command.request_id, "r0");
        let params: SendPromptParams = command.params().unwrap();
        assert_eq!(params.prompt, "hi");
    }

    #[test]
    fn test_request_id_from_line_wins() {
        let command = Command::parse(r#"{"command": "get-sessions", "requestId": "abc"}"#, "r0".into()).unwrap();
        assert_eq!(command.kind, CommandKind::GetSessions);
        assert_eq!(command.request_id, "abc");
    }

    #[test]
    fn test_unknown_command_keeps_request_id() {
        let (err, request_id) = Command::parse(r#"{"command": "fly", "requestId": "x"}"#, "r0".into()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid command");
        assert_eq!(request_id, "x");
    }

    #[test]
    fn test_non_object_rejected() {
        let (err, _) = Command::parse("[1, 2]", "r0".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(Command::parse("{not json", "r0".into()).is_err());
    }

    #[test]
    fn test_camel_case_params() {
        let command = Command::parse(
            r#"{"command": "update-notes", "sessionId": "s1", "notes": "<p>x</p>"}"#,
            "r0".into(),
        )
        .unwrap();
        let params: UpdateNotesParams = command.params().unwrap();
        assert_eq!(params.session_id, "s1");

        let missing: Result<IdParams, _> = command.params();
        assert!(matches!(missing, Err(CommandError::Validation(_))));
    }

    #[test]
    fn test_every_command_name_parses() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::parse(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_envelope_field_names() {
        let response = Response::notes_update("s1", "<h2>x</h2>".into(), BTreeMap::new(), Some("r1".into()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "notes_update");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["requestId"], "r1");
        assert!(json.get("error").is_none());

        let failure = Response::failure(&CommandError::NotFound("Session s1 not found".into()));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "not_found");
    }

    #[test]
    fn test_registry_errors_map_to_kinds() {
        let not_found: CommandError = RegistryError::SessionNotFound("S1".into()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(not_found.to_string(), "Session S1 not found");

        let cycle: CommandError = RegistryError::Folder(FolderError::Cycle("f".into())).into();
        assert_eq!(cycle.kind(), ErrorKind::Validation);
    }
}
