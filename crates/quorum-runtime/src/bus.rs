use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use quorum_core::Envelope;

use crate::mailbox::Mailbox;

/// Routes envelopes to per-agent mailboxes. The orchestrator attaches a
/// mailbox per registered agent; agents keep a bus handle for outbound
/// sends (heartbeat acks, supervisor error notifications).
pub struct MessageBus {
    mailboxes: RwLock<HashMap<String, Arc<Mailbox>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a mailbox under `id`, replacing any previous one.
    pub fn attach(&self, id: &str, mailbox: Arc<Mailbox>) {
        self.mailboxes.write().insert(id.to_string(), mailbox);
    }

    /// Remove and close the mailbox for `id`.
    pub fn detach(&self, id: &str) -> bool {
        match self.mailboxes.write().remove(id) {
            Some(mailbox) => {
                mailbox.close();
                true
            }
            None => false,
        }
    }

    pub fn mailbox(&self, id: &str) -> Option<Arc<Mailbox>> {
        self.mailboxes.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mailboxes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route on `to`. An empty `to` fans out to every mailbox except the
    /// sender's. Returns whether at least one mailbox accepted the message.
    pub fn deliver(&self, msg: Envelope) -> bool {
        if msg.is_broadcast() {
            let targets: Vec<String> = self
                .ids()
                .into_iter()
                .filter(|id| *id != msg.from)
                .collect();
            return self.broadcast(&msg, &targets) > 0;
        }
        let Some(mailbox) = self.mailbox(&msg.to) else {
            trace!(to = %msg.to, "no mailbox for target");
            return false;
        };
        mailbox.push(msg)
    }

    /// Enqueue a copy into each target's mailbox, rewriting `to`. A full
    /// mailbox does not stop delivery to the rest. Returns how many targets
    /// accepted the message.
    pub fn broadcast(&self, msg: &Envelope, targets: &[String]) -> usize {
        let mut delivered = 0;
        for target in targets {
            let Some(mailbox) = self.mailbox(target) else {
                continue;
            };
            let mut copy = msg.clone();
            copy.to = target.clone();
            if mailbox.push(copy) {
                delivered += 1;
            }
        }
        delivered
    }
}
