//! Chat / summarization service seam
//!
//! The backend only needs "instruction + messages in, text out". The HTTP
//! implementation talks to the response router; the mock is used by tests.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use http::HttpChatClient;
pub use mock::MockChatService;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl ServiceError {
    /// Whether retrying the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Timeout(_) | ServiceError::Connection(_) => true,
            ServiceError::Status { status, .. } => *status >= 500 || *status == 429,
            ServiceError::Malformed(_) | ServiceError::Request(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Messages for one completion. A leading system message is the instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Single-turn request: instruction plus one user prompt
    pub fn single(instruction: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::system(instruction), ChatMessage::user(prompt)])
    }

    pub fn instruction(&self) -> &str {
        match self.messages.first() {
            Some(m) if m.role == Role::System => &m.content,
            _ => "",
        }
    }

    fn turns(&self) -> &[ChatMessage] {
        match self.messages.first() {
            Some(m) if m.role == Role::System => &self.messages[1..],
            _ => &self.messages,
        }
    }

    /// Flatten the non-system messages into one prompt text.
    ///
    /// Earlier turns become a `Previous Conversation:` transcript, the last
    /// message is the question.
    pub fn prompt_text(&self) -> String {
        let turns = self.turns();
        let Some((last, earlier)) = turns.split_last() else {
            return String::new();
        };
        if earlier.is_empty() {
            return last.content.clone();
        }

        let transcript = earlier
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Previous Conversation:\n{}\n\nQuestion: {}", transcript, last.content)
    }
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ServiceError>;
}

/// Run a completion under `limit`, mapping expiry to `ServiceError::Timeout`
pub async fn complete_with_timeout(
    service: &dyn ChatService,
    request: &ChatRequest,
    limit: Duration,
) -> Result<String, ServiceError> {
    match tokio::time::timeout(limit, service.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(limit)),
    }
}
