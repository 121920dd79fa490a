use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use quorum_core::{ErrorKind, FailureRecord};

use crate::breaker::CircuitBreaker;
use crate::dlq::DeadLetterQueue;

const HISTORY_LIMIT: usize = 100;

/// A pluggable recovery hook. Handlers advise or recover; they never
/// re-issue the failed call themselves.
pub trait FailureHandler: Send + Sync {
    fn can_handle(&self, kind: ErrorKind) -> bool;
    /// Returns true when the failure was handled/recovered.
    fn handle(&self, record: &FailureRecord) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureStats {
    pub total_failures: usize,
    pub recovered_failures: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub failures_by_agent: BTreeMap<String, usize>,
    pub dead_letters: usize,
}

struct Inner {
    handlers: Vec<Box<dyn FailureHandler>>,
    history: HashMap<String, VecDeque<FailureRecord>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

/// Coordinates failure bookkeeping: per-agent histories (bounded at 100),
/// lazily created per-agent circuit breakers, and the dead-letter queue.
pub struct FailureManager {
    inner: Mutex<Inner>,
    dlq: DeadLetterQueue,
}

impl Default for FailureManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handlers: Vec::new(),
                history: HashMap::new(),
                breakers: HashMap::new(),
            }),
            dlq: DeadLetterQueue::default(),
        }
    }

    pub fn add_handler(&self, handler: Box<dyn FailureHandler>) {
        self.inner.lock().handlers.push(handler);
    }

    /// Append to the agent's history and trip its breaker.
    pub fn record_failure(&self, record: FailureRecord) {
        let breaker = {
            let mut inner = self.inner.lock();
            let history = inner.history.entry(record.agent_id.clone()).or_default();
            history.push_back(record.clone());
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
            Arc::clone(
                inner
                    .breakers
                    .entry(record.agent_id.clone())
                    .or_default(),
            )
        };
        breaker.record_failure();
        debug!(agent_id = %record.agent_id, kind = %record.kind, "failure recorded");
    }

    /// Dispatch to the first handler that claims the kind. Marks the record
    /// recovered on success.
    pub fn handle_failure(&self, record: &mut FailureRecord) -> bool {
        let inner = self.inner.lock();
        for handler in &inner.handlers {
            if handler.can_handle(record.kind) && handler.handle(record) {
                record.recovered = true;
                return true;
            }
        }
        false
    }

    /// Most recent first. `limit` of 0 means everything retained.
    pub fn history(&self, agent_id: &str, limit: usize) -> Vec<FailureRecord> {
        let inner = self.inner.lock();
        let Some(history) = inner.history.get(agent_id) else {
            return Vec::new();
        };
        let take = if limit == 0 { history.len() } else { limit };
        history.iter().rev().take(take).cloned().collect()
    }

    pub fn last_failure(&self, agent_id: &str) -> Option<FailureRecord> {
        self.history(agent_id, 1).into_iter().next()
    }

    /// The agent's breaker, created on first use.
    pub fn breaker(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        Arc::clone(
            self.inner
                .lock()
                .breakers
                .entry(agent_id.to_string())
                .or_default(),
        )
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    pub fn clear_history(&self) {
        self.inner.lock().history.clear();
    }

    pub fn stats(&self) -> FailureStats {
        let inner = self.inner.lock();
        let mut stats = FailureStats {
            total_failures: 0,
            recovered_failures: 0,
            failures_by_kind: BTreeMap::new(),
            failures_by_agent: BTreeMap::new(),
            dead_letters: self.dlq.len(),
        };
        for (agent_id, history) in &inner.history {
            stats.total_failures += history.len();
            stats
                .failures_by_agent
                .insert(agent_id.clone(), history.len());
            for record in history {
                if record.recovered {
                    stats.recovered_failures += 1;
                }
                *stats
                    .failures_by_kind
                    .entry(record.kind.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        stats
    }
}
