//! Notes Synchronizer
//!
//! Keeps each session's notes in step with its conversation. Appending an
//! interaction schedules a regeneration on the session's `NotesWorker`; the
//! shared `NotesSynchronizer` runs it against the summarizer and pushes the
//! result to the output channel.

pub mod prompt;
pub mod sync;
pub mod worker;

use thiserror::Error;

use crate::client::ServiceError;

pub use prompt::{RegenerationInput, EMPTY_NOTES_SENTINEL, MAX_PENDING_INTERACTIONS, SUMMARIZER_ROLE};
pub use sync::{NotesSynchronizer, SyncSettings};
pub use worker::{NotesWorker, TaskRecord, TaskSlot, TaskState};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotesError {
    #[error("No conversations to summarize yet")]
    EmptyLog,
    #[error("Summarizer error: {0}")]
    Service(#[from] ServiceError),
    #[error("Summarizer returned empty notes")]
    EmptyNotes,
    #[error("Worker pool closed")]
    PoolClosed,
}
