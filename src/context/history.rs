//! Conversation Context Builder
//!
//! Global chat memory shared by every `send-prompt`, independent of sessions.
//! Requests carry as much recent history as fits the token budget; the stored
//! history itself is kept under twice that budget.

use super::tokens::{estimate_messages, estimate_tokens_quick};
use crate::client::{ChatMessage, ChatRequest};

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
    last_clipboard: Option<String>,
    max_tokens: usize,
    system_prompt: String,
}

impl ConversationHistory {
    pub fn new(max_tokens: usize, system_prompt: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            last_clipboard: None,
            max_tokens,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn total_tokens(&self) -> usize {
        estimate_messages(&self.messages)
    }

    /// Prefix `prompt` with the clipboard text when it changed since the last prompt.
    pub fn compose_prompt(&mut self, prompt: &str, clipboard: Option<&str>) -> String {
        let Some(clip) = clipboard else {
            return prompt.to_string();
        };
        let changed = self.last_clipboard.as_deref() != Some(clip);
        self.last_clipboard = Some(clip.to_string());

        if changed && !clip.trim().is_empty() {
            format!("Context:\n{}\n\nQuestion: {}", clip, prompt)
        } else {
            prompt.to_string()
        }
    }

    /// System instruction, then the newest history that fits the budget in
    /// chronological order, then `prompt` as the final user message.
    pub fn build_request(&self, prompt: &str) -> ChatRequest {
        let mut used = estimate_tokens_quick(&self.system_prompt) + estimate_tokens_quick(prompt);
        let mut selected = Vec::new();

        for message in self.messages.iter().rev() {
            let tokens = estimate_tokens_quick(&message.content);
            if used + tokens > self.max_tokens {
                break;
            }
            selected.push(message.clone());
            used += tokens;
        }
        selected.reverse();

        let mut messages = Vec::with_capacity(selected.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(selected);
        messages.push(ChatMessage::user(prompt));
        ChatRequest::new(messages)
    }

    /// Append a completed exchange and trim the oldest pairs past the bound
    pub fn record_exchange(&mut self, prompt: &str, response: &str) {
        self.messages.push(ChatMessage::user(prompt));
        self.messages.push(ChatMessage::assistant(response));
        self.trim();
    }

    /// Drop the oldest user/assistant pair until the history is at most
    /// twice the token budget
    pub fn trim(&mut self) {
        let bound = self.max_tokens * 2;
        while !self.messages.is_empty() && self.total_tokens() > bound {
            let n = self.messages.len().min(2);
            self.messages.drain(..n);
        }
    }

    /// Forget all history and clipboard dedup state
    pub fn reset(&mut self) {
        self.messages.clear();
        self.last_clipboard = None;
    }
}
