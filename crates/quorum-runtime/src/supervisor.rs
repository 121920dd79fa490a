use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quorum_core::{Envelope, MessageKind, timestamp_ms};

use crate::agent::Agent;
use crate::bus::MessageBus;
use crate::mailbox::Mailbox;

/// What to restart when a child fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Restart only the failed child.
    OneForOne,
    /// Restart every child.
    OneForAll,
    /// Restart the failed child and every child added after it.
    RestForOne,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub strategy: RestartStrategy,
    /// Restarts allowed per child inside the sliding window.
    pub max_restarts: u32,
    pub restart_window_ms: i64,
    pub health_check_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            strategy: RestartStrategy::OneForOne,
            max_restarts: 3,
            restart_window_ms: 60_000,
            health_check_interval_ms: 1000,
        }
    }
}

/// Owns a set of child agents and keeps them running. Children notify
/// failures via `error` envelopes on the bus; a background monitor also
/// heartbeats every child each tick and treats staleness as failure.
/// A child that exhausts its restart window is left `failed`.
pub struct Supervisor {
    id: String,
    bus: Arc<MessageBus>,
    mailbox: Arc<Mailbox>,
    config: SupervisorConfig,
    children: Mutex<Vec<Arc<Agent>>>,
    restart_history: Mutex<HashMap<String, Vec<i64>>>,
    should_stop: AtomicBool,
    stop_notify: tokio::sync::Notify,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(id: &str, bus: Arc<MessageBus>, config: SupervisorConfig) -> Arc<Supervisor> {
        let mailbox = Arc::new(Mailbox::default());
        bus.attach(id, Arc::clone(&mailbox));
        Arc::new(Supervisor {
            id: id.to_string(),
            bus,
            mailbox,
            config,
            children: Mutex::new(Vec::new()),
            restart_history: Mutex::new(HashMap::new()),
            should_stop: AtomicBool::new(false),
            stop_notify: tokio::sync::Notify::new(),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adopt a child. Its supervisor back-reference is set and, when the
    /// supervisor is already running, the child is started immediately.
    pub fn add_child(&self, child: Arc<Agent>) {
        child.set_supervisor(Some(self.id.clone()));
        if self.bus.mailbox(&child.id()).is_none() {
            self.bus.attach(&child.id(), child.mailbox());
        }
        if self.running.load(Ordering::SeqCst) {
            child.start();
        }
        self.children.lock().push(child);
    }

    pub fn remove_child(&self, child_id: &str) {
        let mut children = self.children.lock();
        if let Some(pos) = children.iter().position(|c| c.id() == child_id) {
            let child = children.remove(pos);
            child.set_supervisor(None);
        }
    }

    pub fn child(&self, child_id: &str) -> Option<Arc<Agent>> {
        self.children
            .lock()
            .iter()
            .find(|c| c.id() == child_id)
            .cloned()
    }

    pub fn children_ids(&self) -> Vec<String> {
        self.children.lock().iter().map(|c| c.id()).collect()
    }

    /// Start all children, the inbox loop, and the health monitor.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.should_stop.store(false, Ordering::SeqCst);
        {
            let children = self.children.lock();
            for child in children.iter() {
                child.start();
            }
        }

        let sup = Arc::clone(self);
        let inbox = tokio::spawn(async move { sup.run_inbox().await });
        let sup = Arc::clone(self);
        let monitor = tokio::spawn(async move { sup.monitor_health().await });
        self.tasks.lock().extend([inbox, monitor]);
        info!(supervisor_id = %self.id, "supervisor started");
    }

    /// Stop the children, then the supervisor's own tasks.
    pub async fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let children: Vec<Arc<Agent>> = self.children.lock().clone();
        for child in &children {
            child.stop();
        }
        for child in &children {
            child.join().await;
        }
        self.mailbox.nudge();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!(supervisor_id = %self.id, "supervisor stopped");
    }

    async fn run_inbox(self: Arc<Self>) {
        while !self.should_stop.load(Ordering::SeqCst) {
            let Some(msg) = self.mailbox.pop(Duration::from_millis(100)).await else {
                continue;
            };
            match msg.kind {
                MessageKind::Error => {
                    debug!(supervisor_id = %self.id, child = %msg.from, "child failure notification");
                    self.handle_child_failure(&msg.from).await;
                }
                MessageKind::Shutdown => break,
                // Heartbeat acks and the rest are bookkeeping-free here.
                _ => {}
            }
        }
    }

    async fn monitor_health(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.health_check_interval_ms);
        while !self.should_stop.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_notify.notified() => break,
            }
            if self.should_stop.load(Ordering::SeqCst) {
                break;
            }
            let children: Vec<Arc<Agent>> = self.children.lock().clone();
            let mut stale = Vec::new();
            for child in &children {
                let heartbeat = Envelope::new(self.id.clone(), child.id(), MessageKind::Heartbeat);
                self.bus.deliver(heartbeat);
                if !child.is_healthy() {
                    stale.push(child.id());
                }
            }
            for child_id in stale {
                warn!(supervisor_id = %self.id, child = %child_id, "child unhealthy");
                self.handle_child_failure(&child_id).await;
            }
        }
    }

    /// Apply the restart strategy to a failed child, or give up and leave
    /// it failed once the restart window is exhausted.
    pub async fn handle_child_failure(&self, child_id: &str) {
        if self.child(child_id).is_none() {
            return;
        }
        if !self.should_restart(child_id) {
            warn!(supervisor_id = %self.id, child = %child_id, "restart window exhausted; leaving child failed");
            if let Some(child) = self.child(child_id) {
                child.stop();
                child.join().await;
                child.mark_failed();
            }
            return;
        }
        match self.config.strategy {
            RestartStrategy::OneForOne => self.restart_child(child_id).await,
            RestartStrategy::OneForAll => self.restart_all_children().await,
            RestartStrategy::RestForOne => self.restart_rest_for_one(child_id).await,
        }
    }

    /// Prune restart stamps older than the window; refuse at the cap, else
    /// stamp now and allow.
    fn should_restart(&self, child_id: &str) -> bool {
        let now = timestamp_ms();
        let mut history = self.restart_history.lock();
        let stamps = history.entry(child_id.to_string()).or_default();
        stamps.retain(|t| now - *t <= self.config.restart_window_ms);
        if stamps.len() >= self.config.max_restarts as usize {
            return false;
        }
        stamps.push(now);
        true
    }

    async fn restart_child(&self, child_id: &str) {
        let Some(child) = self.child(child_id) else {
            return;
        };
        child.stop();
        child.join().await;
        child.start();
        info!(supervisor_id = %self.id, child = %child_id, "child restarted");
    }

    async fn restart_all_children(&self) {
        let children: Vec<Arc<Agent>> = self.children.lock().clone();
        for child in &children {
            child.stop();
        }
        for child in &children {
            child.join().await;
        }
        for child in &children {
            child.start();
        }
        info!(supervisor_id = %self.id, count = children.len(), "all children restarted");
    }

    async fn restart_rest_for_one(&self, child_id: &str) {
        let children: Vec<Arc<Agent>> = self.children.lock().clone();
        let mut found = false;
        for child in &children {
            if !found && child.id() != child_id {
                continue;
            }
            found = true;
            child.stop();
            child.join().await;
            child.start();
        }
        info!(supervisor_id = %self.id, child = %child_id, "rest-for-one restart applied");
    }
}
