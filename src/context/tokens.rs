//! Token estimation.
//!
//! The chat service is a black box, so context budgeting uses a rough count
//! of about four characters per token. `count_tokens` gives an exact
//! cl100k_base count for offline inspection.

use lazy_static::lazy_static;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::client::ChatMessage;

lazy_static! {
    static ref CL100K: Option<CoreBPE> = cl100k_base().ok();
}

/// Estimated tokens in `text` (character length divided by four)
pub fn estimate_tokens_quick(text: &str) -> usize {
    text.chars().count() / 4
}

/// Estimated tokens across the contents of `messages`
pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| estimate_tokens_quick(&m.content)).sum()
}

/// Exact cl100k_base token count, falling back to the estimate when the
/// encoding is unavailable
pub fn count_tokens(text: &str) -> usize {
    match CL100K.as_ref() {
        Some(bpe) if !text.is_empty() => bpe.encode_with_special_tokens(text).len(),
        Some(_) => 0,
        None => estimate_tokens_quick(text),
    }
}

/// Check if text exceeds a token limit
pub fn exceeds_token_limit(text: &str, limit: usize) -> bool {
    estimate_tokens_quick(text) > limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_empty() {
        assert_eq!(estimate_tokens_quick(""), 0);
    }

    #[test]
    fn test_estimate_rounds_down() {
        assert_eq!(estimate_tokens_quick("abc"), 0);
        assert_eq!(estimate_tokens_quick("abcdefgh"), 2);
        assert_eq!(estimate_tokens_quick("abcdefghi"), 2);
    }

    #[test]
    fn test_estimate_counts_characters_not_bytes() {
        assert_eq!(estimate_tokens_quick("ééééêêêê"), 2);
        assert_eq!(estimate_tokens_quick("群论群论群论群论"), 2);
    }

    #[test]
    fn test_estimate_messages_sums_contents() {
        let messages = vec![ChatMessage::user("a".repeat(40)), ChatMessage::assistant("b".repeat(8))];
        assert_eq!(estimate_messages(&messages), 12);
    }

    #[test]
    fn test_count_tokens_exact() {
        assert_eq!(count_tokens(""), 0);
        let count = count_tokens("What is a group in abstract algebra?");
        assert!(count > 0 && count < 20);
    }

    #[test]
    fn test_exceeds_token_limit() {
        assert!(!exceeds_token_limit("Hi", 100));
        assert!(exceeds_token_limit(&"x".repeat(100), 5));
    }
}
