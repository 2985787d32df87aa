//! Context Management Module
//!
//! Builds the bounded chat context sent with every prompt.

pub mod history;
pub mod tokens;

pub use history::ConversationHistory;
pub use tokens::{count_tokens, estimate_messages, estimate_tokens_quick, exceeds_token_limit};
