use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use quorum_core::{Envelope, MessageKind};

use crate::agent::Agent;
use crate::bus::MessageBus;

/// One lockable slice of the shared document.
#[derive(Debug, Clone, Default)]
pub struct DocSection {
    pub content: String,
    /// Empty = unlocked.
    pub locked_by: String,
}

impl DocSection {
    pub fn is_locked(&self) -> bool {
        !self.locked_by.is_empty()
    }
}

struct DocState {
    sections: Vec<DocSection>,
    /// agent id → section indices it holds.
    agent_locks: HashMap<String, Vec<usize>>,
}

/// Serializes concurrent edits to a shared document. Agents acquire a
/// section lock (`lock_request` → `lock_acquired` / `lock_denied`), send
/// `doc_edit` messages for sections they hold, and everyone else hears
/// about changes via broadcast `doc_update` notifications.
///
/// The coordinator is itself an agent: its protocol lives entirely in
/// handlers on the shared inbox loop.
pub struct DocCoordinator {
    agent: Arc<Agent>,
    state: Arc<Mutex<DocState>>,
}

impl DocCoordinator {
    pub fn new(name: &str, bus: Arc<MessageBus>, num_sections: usize) -> DocCoordinator {
        let agent = Agent::local(name, "document coordinator", vec![], Arc::clone(&bus), None);
        let state = Arc::new(Mutex::new(DocState {
            sections: vec![DocSection::default(); num_sections],
            agent_locks: HashMap::new(),
        }));

        let coordinator = DocCoordinator {
            agent,
            state: Arc::clone(&state),
        };
        coordinator.register_handlers();
        coordinator
    }

    fn register_handlers(&self) {
        let state = Arc::clone(&self.state);
        self.agent.register_handler(
            MessageKind::LockRequest,
            Arc::new(move |agent: &Agent, msg: &Envelope| {
                let Some(section) = section_index(msg) else {
                    return Ok(());
                };
                let acquired = try_lock(&state, &msg.from, section);
                let kind = if acquired {
                    MessageKind::LockAcquired
                } else {
                    MessageKind::LockDenied
                };
                debug!(agent_id = %msg.from, section, acquired, "lock request");
                let reply = msg
                    .reply_from(agent.id(), kind)
                    .with_payload(msg.payload.clone());
                agent.bus().deliver(reply);
                Ok(())
            }),
        );

        let state = Arc::clone(&self.state);
        self.agent.register_handler(
            MessageKind::LockRelease,
            Arc::new(move |_agent: &Agent, msg: &Envelope| {
                if let Some(section) = section_index(msg) {
                    release(&state, &msg.from, section);
                }
                Ok(())
            }),
        );

        let state = Arc::clone(&self.state);
        self.agent.register_handler(
            MessageKind::DocEdit,
            Arc::new(move |agent: &Agent, msg: &Envelope| {
                let Some(section) = section_index(msg) else {
                    return Ok(());
                };
                let Some(content) = msg.payload.get("content").and_then(|v| v.as_str()) else {
                    return Ok(());
                };
                let applied = {
                    let mut state = state.lock();
                    match state.sections.get_mut(section) {
                        Some(s) if s.locked_by == msg.from => {
                            s.content = content.to_string();
                            true
                        }
                        _ => false,
                    }
                };
                // Edits without a held lock are dropped silently.
                if applied {
                    let update = Envelope::new(agent.id(), "", MessageKind::DocUpdate)
                        .with_payload(serde_json::json!({ "section": section }));
                    agent.bus().deliver(update);
                }
                Ok(())
            }),
        );
    }

    pub fn agent(&self) -> Arc<Agent> {
        Arc::clone(&self.agent)
    }

    pub fn id(&self) -> String {
        self.agent.id()
    }

    pub fn section_count(&self) -> usize {
        self.state.lock().sections.len()
    }

    /// Direct lock acquisition (same rules as the message path).
    pub fn try_lock_section(&self, agent_id: &str, section: usize) -> bool {
        try_lock(&self.state, agent_id, section)
    }

    /// Release a lock held by `agent_id`. Returns false when it holds none.
    pub fn release_section(&self, agent_id: &str, section: usize) -> bool {
        release(&self.state, agent_id, section)
    }

    pub fn locked_by(&self, section: usize) -> Option<String> {
        let state = self.state.lock();
        state
            .sections
            .get(section)
            .filter(|s| s.is_locked())
            .map(|s| s.locked_by.clone())
    }

    /// Current content of every section, in order.
    pub fn snapshot(&self) -> Vec<String> {
        self.state
            .lock()
            .sections
            .iter()
            .map(|s| s.content.clone())
            .collect()
    }

    /// Sections held by an agent.
    pub fn locks_of(&self, agent_id: &str) -> Vec<usize> {
        self.state
            .lock()
            .agent_locks
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn section_index(msg: &Envelope) -> Option<usize> {
    msg.payload
        .get("section")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
}

fn try_lock(state: &Mutex<DocState>, agent_id: &str, section: usize) -> bool {
    let mut state = state.lock();
    match state.sections.get_mut(section) {
        Some(s) if !s.is_locked() => {
            s.locked_by = agent_id.to_string();
            state
                .agent_locks
                .entry(agent_id.to_string())
                .or_default()
                .push(section);
            true
        }
        _ => false,
    }
}

fn release(state: &Mutex<DocState>, agent_id: &str, section: usize) -> bool {
    let mut state = state.lock();
    match state.sections.get_mut(section) {
        Some(s) if s.locked_by == agent_id => {
            s.locked_by.clear();
            if let Some(held) = state.agent_locks.get_mut(agent_id) {
                held.retain(|idx| *idx != section);
            }
            true
        }
        _ => false,
    }
}
