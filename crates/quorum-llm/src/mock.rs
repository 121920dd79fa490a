//! Mock inference backend for deterministic testing.
//!
//! Returns pre-queued replies in order without touching any model.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::InferenceBackend;
use quorum_core::{QuorumError, Result};

/// One queued reply.
#[derive(Clone)]
enum MockReply {
    Text(String),
    Error(String),
}

/// A backend that replays queued replies and records every call.
///
/// # Example
/// ```
/// use quorum_llm::MockBackend;
/// let backend = MockBackend::new().with_response("hello");
/// ```
pub struct MockBackend {
    replies: Mutex<Vec<MockReply>>,
    calls: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text reply.
    pub fn with_response(self, text: &str) -> Self {
        self.replies.lock().push(MockReply::Text(text.to_string()));
        self
    }

    /// Queue an error reply.
    pub fn with_error(self, message: &str) -> Self {
        self.replies.lock().push(MockReply::Error(message.to_string()));
        self
    }

    /// Prompts and params received so far, in call order.
    pub fn calls(&self) -> Vec<(String, HashMap<String, String>)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_reply(&self) -> MockReply {
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            MockReply::Text("(mock: no more queued replies)".to_string())
        } else {
            replies.remove(0)
        }
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn infer(&self, prompt: &str, params: &HashMap<String, String>) -> Result<String> {
        self.calls
            .lock()
            .push((prompt.to_string(), params.clone()));
        match self.next_reply() {
            MockReply::Text(text) => Ok(text),
            MockReply::Error(message) => Err(QuorumError::Inference(message)),
        }
    }
}
