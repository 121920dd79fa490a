use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use quorum_core::{timestamp_ms, FailureRecord};

pub const DEFAULT_DLQ_CAPACITY: usize = 1000;

/// A payload whose delivery failed repeatedly, set aside for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: String,
    pub failure: FailureRecord,
    pub queued_at: i64,
}

/// Bounded FIFO of dead letters; the oldest entry is evicted on overflow.
pub struct DeadLetterQueue {
    queue: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DLQ_CAPACITY)
    }
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, message_id: impl Into<String>, payload: impl Into<String>, failure: FailureRecord) {
        let mut queue = self.queue.lock();
        queue.push_back(DeadLetter {
            message_id: message_id.into(),
            payload: payload.into(),
            failure,
            queued_at: timestamp_ms(),
        });
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Oldest-first. `limit` of 0 means everything.
    pub fn list(&self, limit: usize) -> Vec<DeadLetter> {
        let queue = self.queue.lock();
        let take = if limit == 0 { queue.len() } else { limit };
        queue.iter().take(take).cloned().collect()
    }

    pub fn remove(&self, message_id: &str) -> bool {
        let mut queue = self.queue.lock();
        if let Some(pos) = queue.iter().position(|d| d.message_id == message_id) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
