// BitNote backend library
// Shared by the stdin/stdout backend process and the inspection CLI

pub mod app;
pub mod client;
pub mod clipboard;
pub mod config;
pub mod context;
pub mod folders;
pub mod ipc;
pub mod keystore;
pub mod notes;
pub mod registry;
pub mod session;
pub mod store;

pub use app::{AppContext, Collaborators};
pub use client::{ChatMessage, ChatRequest, ChatService, HttpChatClient, MockChatService, Role, ServiceError};
pub use config::{BackendConfig, ConfigError};
pub use context::{count_tokens, estimate_tokens_quick, exceeds_token_limit, ConversationHistory};
pub use folders::{Folder, FolderError, FolderSummary, FolderTree};
pub use ipc::{CommandError, Dispatcher, EventSink, MessageType, Response};
pub use notes::{NotesError, NotesSynchronizer, NotesWorker, TaskRecord, TaskState};
pub use registry::{RegistryError, SessionRegistry};
pub use session::{Interaction, Session, SessionRecord, SessionSummary, NO_NOTES_PLACEHOLDER};
pub use store::{SessionStore, StoreError};
