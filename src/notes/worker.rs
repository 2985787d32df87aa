//! Per-session regeneration queue.
//!
//! Every session owns one `NotesWorker`. It numbers regeneration tasks,
//! keeps at most one of them `Scheduled`, lets one run at a time, and
//! remembers how the most recent tasks ended.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// How many finished/in-flight tasks are remembered for diagnostics
const RECENT_TASKS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduled,
    Running,
    Completed,
    /// Superseded before it started
    Cancelled,
    Failed,
    /// Finished, but newer notes were already in place (or the session is gone)
    Stale,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Scheduled | TaskState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub seq: u64,
    pub state: TaskState,
    pub request_id: Option<String>,
    pub error: Option<String>,
}

/// Handle shared between the worker and the task running it
pub struct TaskSlot {
    seq: u64,
    request_id: Option<String>,
    state: Mutex<TaskState>,
    cancel: CancellationToken,
}

impl TaskSlot {
    fn new(seq: u64, request_id: Option<String>) -> Self {
        Self {
            seq,
            request_id,
            state: Mutex::new(TaskState::Scheduled),
            cancel: CancellationToken::new(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Resolves once the task has been cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// `Scheduled → Cancelled`; no effect once running or finished
    fn cancel_if_scheduled(&self) -> bool {
        let mut state = self.state.lock();
        if *state != TaskState::Scheduled {
            return false;
        }
        *state = TaskState::Cancelled;
        self.cancel.cancel();
        true
    }
}

struct WorkerInner {
    next_seq: u64,
    pending: Option<Arc<TaskSlot>>,
    recent: VecDeque<TaskRecord>,
    closed: bool,
}

impl WorkerInner {
    fn record(&mut self, slot: &TaskSlot, state: TaskState, error: Option<String>) {
        if let Some(entry) = self.recent.iter_mut().find(|r| r.seq == slot.seq) {
            entry.state = state;
            entry.error = error;
            return;
        }
        if self.recent.len() == RECENT_TASKS {
            self.recent.pop_front();
        }
        self.recent.push_back(TaskRecord {
            seq: slot.seq,
            state,
            request_id: slot.request_id.clone(),
            error,
        });
    }

    fn cancel_pending(&mut self) {
        if let Some(previous) = self.pending.take() {
            if previous.cancel_if_scheduled() {
                debug!(seq = previous.seq, "Cancelled scheduled notes regeneration");
                self.record(&previous, TaskState::Cancelled, None);
            }
        }
    }
}

pub struct NotesWorker {
    inner: Mutex<WorkerInner>,
    /// Held by the running task; one regeneration per session at a time
    queue: tokio::sync::Mutex<()>,
}

impl Default for NotesWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl NotesWorker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(WorkerInner {
                next_seq: 0,
                pending: None,
                recent: VecDeque::with_capacity(RECENT_TASKS),
                closed: false,
            }),
            queue: tokio::sync::Mutex::new(()),
        }
    }

    /// Issue a new task, cancelling the previous one if it has not started.
    /// `None` once the worker is shut down.
    pub fn schedule(&self, request_id: Option<String>) -> Option<Arc<TaskSlot>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.cancel_pending();

        inner.next_seq += 1;
        let slot = Arc::new(TaskSlot::new(inner.next_seq, request_id));
        inner.record(&slot, TaskState::Scheduled, None);
        inner.pending = Some(slot.clone());
        Some(slot)
    }

    /// Wait for this session's previous regeneration to finish
    pub async fn queue_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.queue.lock().await
    }

    /// `Scheduled → Running`. False if the task was cancelled first.
    pub fn start(&self, slot: &TaskSlot) -> bool {
        let mut inner = self.inner.lock();
        {
            let mut state = slot.state.lock();
            if *state != TaskState::Scheduled {
                return false;
            }
            *state = TaskState::Running;
        }
        inner.record(slot, TaskState::Running, None);
        true
    }

    /// Move a task to a terminal state
    pub fn finish(&self, slot: &TaskSlot, state: TaskState, error: Option<String>) {
        debug_assert!(state.is_terminal());
        let mut inner = self.inner.lock();
        *slot.state.lock() = state;
        inner.record(slot, state, error);
    }

    /// Highest sequence number issued so far
    pub fn latest_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    pub fn recent_tasks(&self) -> Vec<TaskRecord> {
        self.inner.lock().recent.iter().cloned().collect()
    }

    pub fn task_state(&self, seq: u64) -> Option<TaskState> {
        self.inner.lock().recent.iter().find(|r| r.seq == seq).map(|r| r.state)
    }

    /// Stop accepting work and cancel anything not yet started
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.cancel_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
