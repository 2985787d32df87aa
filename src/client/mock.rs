//! Scripted chat service for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::{ChatRequest, ChatService, ServiceError};

type Responder = dyn Fn(usize, &ChatRequest) -> Result<String, ServiceError> + Send + Sync;

/// Answers from a closure, records every request, and can hold chosen calls
/// in flight until the test releases them.
pub struct MockChatService {
    responder: Box<Responder>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    gates: Mutex<HashMap<usize, Arc<Semaphore>>>,
}

impl MockChatService {
    /// `responder` receives the zero-based call index and the request
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &ChatRequest) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Always answers `text`
    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Always fails with `error`
    pub fn failing(error: ServiceError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    /// Make call number `index` wait until a permit is added to the returned gate
    pub fn hold_call(&self, index: usize) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().insert(index, gate.clone());
        gate
    }

    /// Number of calls that have started
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatService for MockChatService {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ServiceError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let gate = self.gates.lock().get(&index).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ServiceError::Connection("gate closed".to_string()))?;
        }

        (self.responder)(index, request)
    }
}
