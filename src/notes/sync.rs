//! Regeneration scheduler
//!
//! Each regeneration is its own tokio task:
//! 1. stays `Scheduled` for the debounce window (a newer interaction cancels it)
//! 2. waits for the session's previous regeneration to finish
//! 3. takes a permit from the shared pool
//! 4. moves to `Running`, snapshots the session and calls the summarizer
//! 5. applies the notes unless newer ones or a manual edit made after the
//!    snapshot are in place, saves, and pushes a `notes_update` message
//!
//! Failures never reach the `send-prompt` caller; they are logged and kept in
//! the worker's task history.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::client::{complete_with_timeout, ChatService};
use crate::config::BackendConfig;
use crate::ipc::output::EventSink;
use crate::ipc::protocol::Response;
use crate::registry::SessionRegistry;
use crate::session::Session;

use super::prompt::RegenerationInput;
use super::worker::{TaskSlot, TaskState};
use super::NotesError;

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub pool_size: usize,
    pub debounce: Duration,
    pub timeout: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            pool_size: config.worker_pool_size.max(1),
            debounce: config.debounce(),
            timeout: config.summarizer_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct NotesSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    summarizer: Arc<dyn ChatService>,
    registry: Arc<SessionRegistry>,
    events: EventSink,
    pool: Semaphore,
    debounce: Duration,
    timeout: Duration,
}

impl NotesSynchronizer {
    pub fn new(
        summarizer: Arc<dyn ChatService>,
        registry: Arc<SessionRegistry>,
        events: EventSink,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                summarizer,
                registry,
                events,
                pool: Semaphore::new(settings.pool_size),
                debounce: settings.debounce,
                timeout: settings.timeout,
            }),
        }
    }

    /// Schedule a regeneration for `session` without waiting for it.
    ///
    /// Cancels the session's previous regeneration if it has not started.
    /// Returns the new task's sequence number, or `None` if the session's
    /// worker is shut down.
    pub fn on_interaction_appended(&self, session: &Arc<Session>, request_id: Option<String>) -> Option<u64> {
        let worker = session.worker();
        let Some(slot) = worker.schedule(request_id) else {
            debug!(session_id = %session.id(), "Worker closed, not scheduling notes regeneration");
            return None;
        };
        let seq = slot.seq();

        if session.interaction_count() == 0 {
            warn!(session_id = %session.id(), seq, "No interactions to summarize");
            worker.finish(&slot, TaskState::Failed, Some(NotesError::EmptyLog.to_string()));
            return Some(seq);
        }

        debug!(session_id = %session.id(), seq, "Scheduled notes regeneration");
        let inner = self.inner.clone();
        let session = session.clone();
        tokio::spawn(async move { inner.run(session, slot).await });
        Some(seq)
    }
}

impl SyncInner {
    async fn run(self: Arc<Self>, session: Arc<Session>, slot: Arc<TaskSlot>) {
        let worker = session.worker();

        tokio::select! {
            _ = slot.cancelled() => return,
            _ = tokio::time::sleep(self.debounce) => {}
        }
        let _turn = tokio::select! {
            _ = slot.cancelled() => return,
            turn = worker.queue_turn() => turn,
        };
        let _permit = tokio::select! {
            _ = slot.cancelled() => return,
            permit = self.pool.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    worker.finish(&slot, TaskState::Failed, Some(NotesError::PoolClosed.to_string()));
                    return;
                }
            },
        };
        if !worker.start(&slot) {
            return;
        }

        match self.regenerate(&session).await {
            Ok((notes, input)) => self.complete(&session, &slot, notes, &input).await,
            Err(e) => {
                warn!(session_id = %session.id(), seq = slot.seq(), error = %e, "Notes regeneration failed");
                worker.finish(&slot, TaskState::Failed, Some(e.to_string()));
            }
        }
    }

    async fn regenerate(&self, session: &Session) -> Result<(String, RegenerationInput), NotesError> {
        let input = {
            let state = session.lock();
            RegenerationInput::from_state(&state)
        }?;
        let request = input.to_request();
        let notes = complete_with_timeout(self.summarizer.as_ref(), &request, self.timeout).await?;
        if notes.trim().is_empty() {
            return Err(NotesError::EmptyNotes);
        }
        Ok((notes, input))
    }

    async fn complete(&self, session: &Arc<Session>, slot: &TaskSlot, notes: String, input: &RegenerationInput) {
        let worker = session.worker();
        let seq = slot.seq();

        if !self.registry.contains(session) {
            debug!(session_id = %session.id(), seq, "Session removed, discarding notes");
            worker.finish(slot, TaskState::Stale, Some("session removed".to_string()));
            return;
        }
        if !session.apply_generated_notes(seq, input.notes_version, &notes, input.covered) {
            debug!(session_id = %session.id(), seq, "Newer notes in place, discarding");
            worker.finish(slot, TaskState::Stale, None);
            return;
        }

        let registry = self.registry.clone();
        match tokio::task::spawn_blocking(move || registry.save()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(session_id = %session.id(), error = %e, "Failed to save regenerated notes"),
            Err(e) => error!(session_id = %session.id(), error = %e, "Save task failed"),
        }

        worker.finish(slot, TaskState::Completed, None);
        info!(session_id = %session.id(), seq, "Notes updated");

        let push = Response::notes_update(
            session.id(),
            notes,
            self.registry.list_summaries(),
            slot.request_id().map(str::to_string),
        );
        if !self.events.send(push) {
            warn!(session_id = %session.id(), "Output closed, dropping notes update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockChatService, ServiceError};
    use crate::ipc::output::{Outbound, OutboundReceiver};
    use crate::ipc::protocol::MessageType;
    use crate::store::SessionStore;

    struct Harness {
        _dir: tempfile::TempDir,
        registry: Arc<SessionRegistry>,
        sync: NotesSynchronizer,
        rx: OutboundReceiver,
    }

    fn harness(summarizer: Arc<MockChatService>, debounce_ms: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::open(SessionStore::new(dir.path())));
        let (events, rx) = EventSink::channel();
        let sync = NotesSynchronizer::new(
            summarizer,
            registry.clone(),
            events,
            SyncSettings {
                pool_size: 4,
                debounce: Duration::from_millis(debounce_ms),
                timeout: Duration::from_secs(5),
            },
        );
        Harness { _dir: dir, registry, sync, rx }
    }

    fn new_session(h: &Harness) -> Arc<Session> {
        let id = h.registry.create(Some("Algebra"), None).unwrap();
        h.registry.get(&id).unwrap()
    }

    async fn next_push(rx: &mut OutboundReceiver) -> Response {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(Outbound::Message(response))) => return response,
                Ok(Some(Outbound::Flush(_))) => continue,
                _ => panic!("no push message arrived"),
            }
        }
    }

    async fn wait_for(session: &Session, seq: u64, state: TaskState) {
        for _ in 0..500 {
            if session.worker().task_state(seq) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", seq, state);
    }

    #[tokio::test]
    async fn test_regeneration_updates_saves_and_pushes() {
        let mock = Arc::new(MockChatService::replying("<h2>Groups</h2>"));
        let mut h = harness(mock.clone(), 0);
        let session = new_session(&h);
        session.append_interaction("What is a group?", "A set with an operation.");

        let seq = h.sync.on_interaction_appended(&session, Some("req-1".into())).unwrap();
        let push = next_push(&mut h.rx).await;

        assert!(push.success);
        assert_eq!(push.kind, Some(MessageType::NotesUpdate));
        assert_eq!(push.session_id.as_deref(), Some(session.id()));
        assert_eq!(push.request_id.as_deref(), Some("req-1"));
        assert_eq!(push.response.as_deref(), Some("<h2>Groups</h2>"));
        assert!(push.sessions.unwrap().contains_key(session.id()));

        assert_eq!(session.notes(), "<h2>Groups</h2>");
        assert_eq!(session.worker().task_state(seq), Some(TaskState::Completed));

        let reopened = SessionRegistry::open(h.registry.store().clone());
        assert_eq!(reopened.get(session.id()).unwrap().notes(), "<h2>Groups</h2>");
    }

    #[tokio::test]
    async fn test_rapid_interactions_regenerate_once() {
        let mock = Arc::new(MockChatService::replying("<h2>Both</h2>"));
        let mut h = harness(mock.clone(), 100);
        let session = new_session(&h);

        session.append_interaction("q1", "a1");
        let first = h.sync.on_interaction_appended(&session, None).unwrap();
        session.append_interaction("q2", "a2");
        let second = h.sync.on_interaction_appended(&session, None).unwrap();

        next_push(&mut h.rx).await;
        assert_eq!(mock.call_count(), 1);
        assert_eq!(session.worker().task_state(first), Some(TaskState::Cancelled));
        assert_eq!(session.worker().task_state(second), Some(TaskState::Completed));

        // The surviving task folds in the cancelled task's interaction.
        let prompt = mock.requests()[0].prompt_text();
        assert!(prompt.contains("Q: q1"));
        assert!(prompt.contains("Q: q2"));
    }

    #[tokio::test]
    async fn test_failure_keeps_notes_and_stays_silent() {
        let mock = Arc::new(MockChatService::failing(ServiceError::Status {
            status: 500,
            body: "boom".into(),
        }));
        let mut h = harness(mock, 0);
        let session = new_session(&h);
        h.registry.update_notes(session.id(), "<h2>Keep</h2>").unwrap();
        session.append_interaction("q", "a");

        let seq = h.sync.on_interaction_appended(&session, None).unwrap();
        wait_for(&session, seq, TaskState::Failed).await;

        assert_eq!(session.notes(), "<h2>Keep</h2>");
        assert!(h.rx.try_recv().is_err());
        let record = session.worker().recent_tasks().pop().unwrap();
        assert!(record.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_empty_log_fails_immediately() {
        let mock = Arc::new(MockChatService::replying("unused"));
        let mut h = harness(mock.clone(), 0);
        let session = new_session(&h);

        let seq = h.sync.on_interaction_appended(&session, None).unwrap();
        assert_eq!(session.worker().task_state(seq), Some(TaskState::Failed));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.call_count(), 0);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_edit_beats_inflight_regeneration() {
        let mock = Arc::new(MockChatService::replying("<h2>Generated</h2>"));
        let gate = mock.hold_call(0);
        let mut h = harness(mock, 0);
        let session = new_session(&h);
        session.append_interaction("q", "a");

        let seq = h.sync.on_interaction_appended(&session, None).unwrap();
        wait_for(&session, seq, TaskState::Running).await;
        h.registry.update_notes(session.id(), "<h2>Mine</h2>").unwrap();
        gate.add_permits(1);

        wait_for(&session, seq, TaskState::Stale).await;
        assert_eq!(session.notes(), "<h2>Mine</h2>");
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_edit_during_debounce_still_regenerates() {
        let mock = Arc::new(MockChatService::replying("<h2>Mine</h2><h2>Groups</h2>"));
        let mut h = harness(mock.clone(), 100);
        let session = new_session(&h);
        session.append_interaction("What is a group?", "A set with an operation.");

        let seq = h.sync.on_interaction_appended(&session, Some("req-1".into())).unwrap();
        h.registry.update_notes(session.id(), "<h2>Mine</h2>").unwrap();
        assert_eq!(session.worker().task_state(seq), Some(TaskState::Scheduled));

        let push = next_push(&mut h.rx).await;
        assert_eq!(push.response.as_deref(), Some("<h2>Mine</h2><h2>Groups</h2>"));
        assert_eq!(session.worker().task_state(seq), Some(TaskState::Completed));
        assert_eq!(session.notes(), "<h2>Mine</h2><h2>Groups</h2>");
        assert_eq!(session.lock().summarized, 1);

        // The regeneration starts from the edited notes.
        assert_eq!(mock.call_count(), 1);
        let prompt = mock.requests()[0].prompt_text();
        assert!(prompt.contains("<h2>Mine</h2>"));
        assert!(prompt.contains("Q: What is a group?"));
    }

    #[tokio::test]
    async fn test_deleted_session_discards_completion() {
        let mock = Arc::new(MockChatService::replying("<h2>Late</h2>"));
        let gate = mock.hold_call(0);
        let mut h = harness(mock, 0);
        let session = new_session(&h);
        session.append_interaction("q", "a");

        let seq = h.sync.on_interaction_appended(&session, None).unwrap();
        wait_for(&session, seq, TaskState::Running).await;
        assert!(h.registry.delete(session.id()));
        gate.add_permits(1);

        wait_for(&session, seq, TaskState::Stale).await;
        assert!(h.rx.try_recv().is_err());
        assert!(h.sync.on_interaction_appended(&session, None).is_none());
    }

    #[tokio::test]
    async fn test_running_task_finishes_before_next_starts() {
        let mock = Arc::new(MockChatService::new(|index, _| Ok(format!("<h2>v{}</h2>", index))));
        let gate = mock.hold_call(0);
        let mut h = harness(mock.clone(), 0);
        let session = new_session(&h);

        session.append_interaction("q1", "a1");
        let first = h.sync.on_interaction_appended(&session, None).unwrap();
        wait_for(&session, first, TaskState::Running).await;

        session.append_interaction("q2", "a2");
        let second = h.sync.on_interaction_appended(&session, None).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.worker().task_state(second), Some(TaskState::Scheduled));
        gate.add_permits(1);

        assert_eq!(next_push(&mut h.rx).await.response.as_deref(), Some("<h2>v0</h2>"));
        assert_eq!(next_push(&mut h.rx).await.response.as_deref(), Some("<h2>v1</h2>"));
        assert_eq!(session.notes(), "<h2>v1</h2>");
        assert_eq!(session.worker().task_state(first), Some(TaskState::Completed));

        let second_prompt = mock.requests()[1].prompt_text();
        assert!(second_prompt.contains("<h2>v0</h2>"));
        assert!(second_prompt.contains("Q: q2"));
        assert!(!second_prompt.contains("Q: q1"));
    }
}
