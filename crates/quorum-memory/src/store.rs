use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use quorum_core::{QuorumError, Request, Result, new_id, timestamp_ms};

use crate::thread::{ConversationThread, ConversationTurn};

/// Default thread lifetime: three hours.
pub const DEFAULT_TTL_MS: i64 = 3 * 3600 * 1000;
/// Soft cap on live threads.
pub const DEFAULT_MAX_THREADS: usize = 10_000;

/// In-process conversation memory. Threads expire `ttl_ms` after creation
/// (or after the last `touch`); any read that observes expiration removes
/// the thread and reports not-found.
pub struct ConversationStore {
    threads: Mutex<HashMap<String, ConversationThread>>,
    ttl_ms: i64,
    max_threads: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_MS, DEFAULT_MAX_THREADS)
    }
}

impl ConversationStore {
    pub fn new(ttl_ms: i64, max_threads: usize) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            ttl_ms,
            max_threads,
        }
    }

    fn is_expired(thread: &ConversationThread) -> bool {
        timestamp_ms() >= thread.expires_at
    }

    /// Create a thread for `agent_id`, seeding its context map from the
    /// request params. If the request already carries a thread id it is
    /// recorded as the parent (branch-style continuation).
    ///
    /// Capacity is best-effort: at the cap, expired threads are swept first
    /// and creation proceeds regardless.
    pub fn create_thread(&self, agent_id: &str, initial_request: &Request) -> String {
        let mut threads = self.threads.lock();
        if threads.len() >= self.max_threads {
            threads.retain(|_, t| !Self::is_expired(t));
        }

        let now = timestamp_ms();
        let thread = ConversationThread {
            thread_id: new_id(),
            parent_id: initial_request.thread_id.clone(),
            initiating_agent: agent_id.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.ttl_ms,
            turns: Vec::new(),
            context: initial_request
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let id = thread.thread_id.clone();
        threads.insert(id.clone(), thread);
        debug!(thread_id = %id, agent_id, "conversation thread created");
        id
    }

    /// Append a turn. Bumps `updated_at` but does NOT extend `expires_at`
    /// (that is what `touch` is for). Fails on missing or expired threads.
    pub fn add_turn(&self, thread_id: &str, turn: ConversationTurn) -> Result<()> {
        let mut threads = self.threads.lock();
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| QuorumError::ThreadNotFound(thread_id.to_string()))?;
        if Self::is_expired(thread) {
            threads.remove(thread_id);
            return Err(QuorumError::ThreadExpired(thread_id.to_string()));
        }
        thread.updated_at = turn.timestamp;
        thread.turns.push(turn);
        Ok(())
    }

    /// Snapshot a thread. Expired threads are removed and reported absent.
    pub fn get_thread(&self, thread_id: &str) -> Option<ConversationThread> {
        let mut threads = self.threads.lock();
        match threads.get(thread_id) {
            Some(thread) if Self::is_expired(thread) => {
                threads.remove(thread_id);
                None
            }
            Some(thread) => Some(thread.clone()),
            None => None,
        }
    }

    /// Extend the thread's lifetime by a full TTL from now.
    pub fn touch(&self, thread_id: &str) -> Result<()> {
        let mut threads = self.threads.lock();
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| QuorumError::ThreadNotFound(thread_id.to_string()))?;
        thread.updated_at = timestamp_ms();
        thread.expires_at = thread.updated_at + self.ttl_ms;
        Ok(())
    }

    /// Idempotent: deleting a missing thread is not an error.
    pub fn delete(&self, thread_id: &str) -> bool {
        self.threads.lock().remove(thread_id).is_some()
    }

    pub fn has_thread(&self, thread_id: &str) -> bool {
        let mut threads = self.threads.lock();
        match threads.get(thread_id) {
            Some(thread) if Self::is_expired(thread) => {
                threads.remove(thread_id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove every expired thread, returning how many were swept.
    pub fn cleanup_expired(&self) -> usize {
        let mut threads = self.threads.lock();
        let before = threads.len();
        threads.retain(|_, t| !Self::is_expired(t));
        before - threads.len()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Thread ids initiated by the given agent.
    pub fn agent_threads(&self, agent_id: &str) -> Vec<String> {
        self.threads
            .lock()
            .values()
            .filter(|t| t.initiating_agent == agent_id)
            .map(|t| t.thread_id.clone())
            .collect()
    }

    /// Branch: a new thread whose context map and turns are deep copies of
    /// the parent's at this moment. The parent is unaffected.
    pub fn branch(&self, parent_id: &str, agent_id: &str) -> Result<String> {
        let parent = self
            .get_thread(parent_id)
            .ok_or_else(|| QuorumError::ThreadNotFound(parent_id.to_string()))?;

        let now = timestamp_ms();
        let child = ConversationThread {
            thread_id: new_id(),
            parent_id: parent_id.to_string(),
            initiating_agent: agent_id.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.ttl_ms,
            turns: parent.turns,
            context: parent.context,
        };
        let id = child.thread_id.clone();
        self.threads.lock().insert(id.clone(), child);
        debug!(parent_id, child_id = %id, "conversation thread branched");
        Ok(id)
    }

    /// Serialize one thread to JSON.
    pub fn export_thread(&self, thread_id: &str) -> Result<String> {
        let thread = self
            .get_thread(thread_id)
            .ok_or_else(|| QuorumError::ThreadNotFound(thread_id.to_string()))?;
        Ok(serde_json::to_string(&thread)?)
    }

    /// Store a thread as-is under its embedded id, overwriting any existing
    /// thread of the same id. Returns the id.
    pub fn import_thread(&self, json: &str) -> Result<String> {
        let thread: ConversationThread = serde_json::from_str(json)?;
        let id = thread.thread_id.clone();
        self.threads.lock().insert(id.clone(), thread);
        Ok(id)
    }
}
