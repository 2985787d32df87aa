//! Regeneration prompt policy
//!
//! Turns a session's pending interactions and current notes into a single
//! summarizer request. Existing notes are extended in place; a session
//! without notes gets an initial structured note.

use crate::client::ChatRequest;
use crate::session::{Interaction, SessionState};

use super::NotesError;

/// System instruction for the summarizer
pub const SUMMARIZER_ROLE: &str = "You are a note summarizer. Create clear, concise, and structured notes \
that only contain useful information and are to the point using HTML formatting for better readability.";

/// Stands in for the notes when a session has none yet
pub const EMPTY_NOTES_SENTINEL: &str = "(no notes yet)";

/// Most interactions folded into one regeneration
pub const MAX_PENDING_INTERACTIONS: usize = 8;

const UPDATE_RULES: &str = "Rules:
1. Keep the existing headings unless there is a clearly better way to organize the information.
2. Integrate new information into the matching existing section, expanding on the ideas already there.
3. If the new information is materially different from every existing section, add a new section for it.
4. If the notes grow too large, reorganize them rather than appending indefinitely.
5. Draw connections between new and existing information where possible.";

const INITIAL_RULES: &str = "Create initial notes from this conversation. We only care about the notes, not any commentary.
Focus on:
1. Key concepts and ideas discussed
2. Important technical details
3. Code examples or technical solutions
4. Core takeaways
The notes should be detailed and to the point, not a high level summary.";

const FORMAT_RULES: &str = "Format requirements:
- Every heading must be wrapped in <h2> tags; never output raw text headings.
- Use <ul>/<li> for lists of related items.
- Wrap code examples in <pre><code> tags.
- Use <p> tags for paragraphs.
- Add <br> for spacing where appropriate.
- Keep formatting consistent throughout the document.";

/// Snapshot of everything one regeneration needs
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationInput {
    pub existing_notes: String,
    pub interactions: Vec<Interaction>,
    /// Interaction count the resulting notes will cover
    pub covered: usize,
    /// Manual edit counter at snapshot time
    pub notes_version: u64,
}

impl RegenerationInput {
    /// Collect the interactions not yet reflected in the notes (at most
    /// `MAX_PENDING_INTERACTIONS`, newest kept). When the notes already cover
    /// everything, the most recent interaction is used again.
    pub fn from_state(state: &SessionState) -> Result<Self, NotesError> {
        let total = state.interactions.len();
        if total == 0 {
            return Err(NotesError::EmptyLog);
        }
        let first_pending = state.summarized.min(total - 1);
        let start = first_pending.max(total.saturating_sub(MAX_PENDING_INTERACTIONS));

        Ok(Self {
            existing_notes: state.notes.clone(),
            interactions: state.interactions[start..].to_vec(),
            covered: total,
            notes_version: state.notes_version,
        })
    }

    pub fn has_notes(&self) -> bool {
        !self.existing_notes.trim().is_empty()
    }

    pub fn to_request(&self) -> ChatRequest {
        ChatRequest::single(SUMMARIZER_ROLE, self.render())
    }

    fn render(&self) -> String {
        let conversation = self
            .interactions
            .iter()
            .map(|i| format!("Q: {}\n\nA: {}", i.prompt, i.response))
            .collect::<Vec<_>>()
            .join("\n\n");

        if self.has_notes() {
            format!(
                "{}\n\n{}\n\nExisting Notes:\n{}\n\nNew Information to Insert:\n{}",
                UPDATE_RULES, FORMAT_RULES, self.existing_notes, conversation
            )
        } else {
            format!(
                "{}\n\n{}\n\nExisting Notes:\n{}\n\nConversation:\n{}",
                INITIAL_RULES, FORMAT_RULES, EMPTY_NOTES_SENTINEL, conversation
            )
        }
    }
}
