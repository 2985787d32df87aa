//! Application context shared by every command handler

use parking_lot::Mutex;
use std::sync::Arc;

use crate::client::{ChatService, HttpChatClient};
use crate::clipboard::{ClipboardSource, CommandClipboard};
use crate::config::BackendConfig;
use crate::context::ConversationHistory;
use crate::ipc::output::{EventSink, OutboundReceiver};
use crate::keystore::{FileKeyStore, KeyStore};
use crate::notes::{NotesSynchronizer, SyncSettings};
use crate::registry::SessionRegistry;
use crate::store::SessionStore;

/// External services the backend talks to
pub struct Collaborators {
    pub chat: Arc<dyn ChatService>,
    pub summarizer: Arc<dyn ChatService>,
    pub clipboard: Arc<dyn ClipboardSource>,
    pub keys: Arc<dyn KeyStore>,
}

impl Collaborators {
    /// HTTP chat client, command-line clipboard and file key store
    pub fn from_config(config: &BackendConfig) -> Self {
        let keys: Arc<dyn KeyStore> = Arc::new(FileKeyStore::new(&config.data_dir));
        let chat: Arc<dyn ChatService> = Arc::new(HttpChatClient::new(
            &config.api_url,
            config.request_timeout(),
            keys.clone(),
        ));
        let summarizer: Arc<dyn ChatService> = Arc::new(HttpChatClient::new(
            &config.api_url,
            config.summarizer_timeout(),
            keys.clone(),
        ));
        let clipboard = config
            .clipboard_command
            .as_deref()
            .and_then(CommandClipboard::new)
            .unwrap_or_else(CommandClipboard::platform_default);

        Self {
            chat,
            summarizer,
            clipboard: Arc::new(clipboard),
            keys,
        }
    }
}

pub struct AppContext {
    pub config: BackendConfig,
    pub registry: Arc<SessionRegistry>,
    /// Global chat history sent as context with every prompt
    pub history: Mutex<ConversationHistory>,
    pub chat: Arc<dyn ChatService>,
    pub clipboard: Arc<dyn ClipboardSource>,
    pub keys: Arc<dyn KeyStore>,
    pub notes: NotesSynchronizer,
    pub events: EventSink,
}

impl AppContext {
    /// Open the registry under `config.data_dir` and wire up the handlers.
    /// The receiver must be handed to the output writer.
    pub fn new(config: BackendConfig, collaborators: Collaborators) -> (Self, OutboundReceiver) {
        let (events, outbound) = EventSink::channel();
        let registry = Arc::new(SessionRegistry::open(SessionStore::new(&config.data_dir)));
        let notes = NotesSynchronizer::new(
            collaborators.summarizer,
            registry.clone(),
            events.clone(),
            SyncSettings::from_config(&config),
        );
        let history = ConversationHistory::new(config.max_tokens, config.system_prompt.clone());

        let context = Self {
            registry,
            history: Mutex::new(history),
            chat: collaborators.chat,
            clipboard: collaborators.clipboard,
            keys: collaborators.keys,
            notes,
            events,
            config,
        };
        (context, outbound)
    }
}
