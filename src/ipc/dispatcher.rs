//! Command dispatcher
//!
//! Reads one command per line, runs its handler to completion, and queues
//! exactly one response per line. Notes pushes share the same output channel.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::app::AppContext;
use crate::client::complete_with_timeout;
use crate::registry::RegistryError;
use crate::session::NO_NOTES_PLACEHOLDER;

use super::output::{write_lines, OutboundReceiver};
use super::protocol::{
    Command, CommandError, CommandKind, CreateFolderParams, IdParams, MessageType, MoveFolderParams,
    MoveSessionParams, RenameFolderParams, Response, SendPromptParams, SetApiKeyParams, StartSessionParams,
    UpdateNotesParams,
};

pub struct Dispatcher {
    ctx: Arc<AppContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Serve `reader` until end of input, writing every response and push to
    /// `writer`. Returns once everything queued has been written.
    pub async fn run<R, W>(&self, mut reader: R, outbound: OutboundReceiver, writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(write_lines(outbound, writer));
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let response = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle_line(line).await,
                Err(e) => {
                    let error = CommandError::Validation(format!("Invalid UTF-8: {}", e));
                    Response::failure(&error).with_request_id(Ulid::new().to_string())
                }
            };
            self.ctx.events.send(response);
        }

        info!("Input closed");
        self.ctx.events.flush().await;
        Ok(())
    }

    /// Handle one input line and build its response
    pub async fn handle_line(&self, line: &str) -> Response {
        let command = match Command::parse(line.trim(), Ulid::new().to_string()) {
            Ok(command) => command,
            Err((error, request_id)) => {
                warn!(error = %error, "Rejected input line");
                return Response::failure(&error).with_request_id(request_id);
            }
        };
        debug!(command = command.kind.name(), request_id = %command.request_id, "Dispatching");

        let request_id = command.request_id.clone();
        match self.dispatch(&command).await {
            Ok(response) => response.with_request_id(request_id),
            Err(error) => {
                warn!(command = command.kind.name(), error = %error, "Command failed");
                Response::failure(&error).with_request_id(request_id)
            }
        }
    }

    async fn dispatch(&self, command: &Command) -> Result<Response, CommandError> {
        match command.kind {
            CommandKind::SendPrompt => self.send_prompt(command).await,
            CommandKind::StartSession => self.start_session(command.params()?),
            CommandKind::EndSession => self.end_session(),
            CommandKind::LoadSession => self.load_session(command.params()?),
            CommandKind::DeleteSession => self.delete_session(command.params()?),
            CommandKind::GetSessions => Ok(self.with_listing(Response::ok())),
            CommandKind::UpdateNotes => self.update_notes(command.params()?),
            CommandKind::RefreshMemory => self.refresh_memory(),
            CommandKind::SetApiKey => self.set_api_key(command.params()?),
            CommandKind::CheckApiKey => Ok(Response::ok().with_has_key(self.ctx.keys.load().is_some())),
            CommandKind::CreateFolder => self.create_folder(command.params()?),
            CommandKind::RenameFolder => self.rename_folder(command.params()?),
            CommandKind::MoveFolder => self.move_folder(command.params()?),
            CommandKind::DeleteFolder => self.delete_folder(command.params()?),
            CommandKind::MoveSession => self.move_session(command.params()?),
        }
    }

    fn with_sessions(&self, response: Response) -> Response {
        response.with_sessions(self.ctx.registry.list_summaries())
    }

    fn with_listing(&self, response: Response) -> Response {
        self.with_sessions(response).with_folders(self.ctx.registry.folder_summaries())
    }

    // ============ CHAT ============

    async fn send_prompt(&self, command: &Command) -> Result<Response, CommandError> {
        let params: SendPromptParams = command.params()?;
        if params.prompt.trim().is_empty() {
            return Err(CommandError::Validation("Prompt is required".to_string()));
        }

        let clipboard = if self.ctx.config.clipboard_enabled && params.use_clipboard.unwrap_or(true) {
            Some(self.ctx.clipboard.read().await)
        } else {
            None
        };
        let (full_prompt, request) = {
            let mut history = self.ctx.history.lock();
            let full_prompt = history.compose_prompt(&params.prompt, clipboard.as_deref());
            let request = history.build_request(&full_prompt);
            (full_prompt, request)
        };

        let reply = complete_with_timeout(self.ctx.chat.as_ref(), &request, self.ctx.config.request_timeout()).await?;

        let conversation_history = {
            let mut history = self.ctx.history.lock();
            history.record_exchange(&full_prompt, &reply);
            history.messages().to_vec()
        };

        if let Some(session_id) = params.session_id.as_deref() {
            match self.ctx.registry.record_interaction(session_id, &params.prompt, &reply) {
                Some(session) => {
                    self.ctx
                        .notes
                        .on_interaction_appended(&session, Some(command.request_id.clone()));
                }
                None => warn!(session_id = %session_id, "Prompt for unknown session, not recorded"),
            }
        }

        Ok(self
            .with_sessions(Response::ok())
            .with_response(reply)
            .with_kind(MessageType::ChatResponse)
            .with_session_id(params.session_id)
            .with_history(conversation_history))
    }

    fn refresh_memory(&self) -> Result<Response, CommandError> {
        self.ctx.history.lock().reset();
        info!("Conversation memory cleared");
        Ok(self.with_sessions(Response::ok()))
    }

    fn set_api_key(&self, params: SetApiKeyParams) -> Result<Response, CommandError> {
        let key = params
            .key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CommandError::Validation("Invalid API key".to_string()))?;
        self.ctx.keys.save(&key)?;
        Ok(Response::ok().with_has_key(true))
    }

    // ============ SESSIONS ============

    fn start_session(&self, params: StartSessionParams) -> Result<Response, CommandError> {
        let id = self
            .ctx
            .registry
            .create(params.name.as_deref(), params.folder_id.as_deref())?;
        Ok(self.with_listing(Response::ok()).with_session_id(Some(id)))
    }

    fn end_session(&self) -> Result<Response, CommandError> {
        self.ctx.registry.end_active();
        Ok(self.with_sessions(Response::ok()))
    }

    fn load_session(&self, params: IdParams) -> Result<Response, CommandError> {
        let session = self
            .ctx
            .registry
            .get(&params.id)
            .ok_or_else(|| RegistryError::SessionNotFound(params.id.clone()))?;
        let notes = session.notes();
        let notes = if notes.trim().is_empty() {
            NO_NOTES_PLACEHOLDER.to_string()
        } else {
            notes
        };

        Ok(self
            .with_sessions(Response::ok())
            .with_response(notes)
            .with_session_id(Some(params.id))
            .with_history(session.conversation_messages()))
    }

    fn delete_session(&self, params: IdParams) -> Result<Response, CommandError> {
        if !self.ctx.registry.delete(&params.id) {
            return Err(RegistryError::SessionNotFound(params.id).into());
        }
        Ok(self.with_listing(Response::ok()))
    }

    fn update_notes(&self, params: UpdateNotesParams) -> Result<Response, CommandError> {
        self.ctx.registry.update_notes(&params.session_id, &params.notes)?;
        Ok(self
            .with_sessions(Response::ok())
            .with_session_id(Some(params.session_id)))
    }

    fn move_session(&self, params: MoveSessionParams) -> Result<Response, CommandError> {
        self.ctx
            .registry
            .move_session(&params.session_id, params.folder_id.as_deref())?;
        Ok(self
            .with_listing(Response::ok())
            .with_session_id(Some(params.session_id)))
    }

    // ============ FOLDERS ============

    fn create_folder(&self, params: CreateFolderParams) -> Result<Response, CommandError> {
        let id = self
            .ctx
            .registry
            .create_folder(&params.name, params.parent_id.as_deref())
            .map_err(|e| match e {
                // A missing parent is a bad request, not a missing target
                RegistryError::Folder(inner) => CommandError::Validation(inner.to_string()),
                other => other.into(),
            })?;
        Ok(self.with_listing(Response::ok()).with_folder_id(id))
    }

    fn rename_folder(&self, params: RenameFolderParams) -> Result<Response, CommandError> {
        self.ctx.registry.rename_folder(&params.id, &params.name)?;
        Ok(self.with_listing(Response::ok()).with_folder_id(params.id))
    }

    fn move_folder(&self, params: MoveFolderParams) -> Result<Response, CommandError> {
        self.ctx
            .registry
            .move_folder(&params.id, params.parent_id.as_deref())?;
        Ok(self.with_listing(Response::ok()).with_folder_id(params.id))
    }

    fn delete_folder(&self, params: IdParams) -> Result<Response, CommandError> {
        self.ctx.registry.delete_folder(&params.id)?;
        Ok(self.with_listing(Response::ok()))
    }
}
