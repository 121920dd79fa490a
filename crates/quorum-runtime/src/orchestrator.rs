use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quorum_core::{
    AgentInfo, AgentStats, AgentStatus, Envelope, ErrorKind, FailureRecord, QuorumError, Request,
    Response, ResponseStatus, Result,
};
use quorum_failure::{FailureManager, RetryPolicy};
use quorum_memory::ConversationStore;

use crate::agent::Agent;
use crate::bus::MessageBus;
use crate::consensus::ConsensusManager;
use crate::knowledge::KnowledgeBase;
use crate::mailbox::Mailbox;
use crate::scheduler::TaskScheduler;

/// Discovery filter for [`Orchestrator::find`].
#[derive(Debug, Clone)]
pub struct AgentQuery {
    pub capabilities: Vec<String>,
    /// true = agent must have every capability; false = any one suffices.
    pub require_all_capabilities: bool,
    /// Agents whose status sorts below this are excluded.
    pub min_status: AgentStatus,
    pub metadata_filters: HashMap<String, String>,
}

impl Default for AgentQuery {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            require_all_capabilities: true,
            min_status: AgentStatus::Active,
            metadata_filters: HashMap::new(),
        }
    }
}

impl AgentQuery {
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.push(capability.to_string());
        self
    }

    pub fn with_min_status(mut self, min_status: AgentStatus) -> Self {
        self.min_status = min_status;
        self
    }
}

/// Snapshot of registry-wide counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub busy_agents: usize,
    pub error_agents: usize,
    pub offline_agents: usize,
    pub total_messages: i64,
    pub total_requests: i64,
    pub total_failures: i64,
    pub agent_stats: BTreeMap<String, AgentStats>,
}

/// Result of fanning one request across several agents.
#[derive(Debug, Clone)]
pub struct ConsensusResponse {
    pub responses: Vec<Response>,
    pub synthesized: String,
}

/// Hook observing every synchronously dispatched message and its response.
pub type MessageHook = Box<dyn Fn(&Envelope, &Response) + Send + Sync>;

/// Map a response's kind string onto the failure vocabulary. The runtime's
/// private kinds count as internal errors; anything unrecognized is unknown.
fn classify(error_kind: &str) -> ErrorKind {
    match error_kind {
        "inference_error" | "no_inference_callback" => ErrorKind::InternalError,
        other => ErrorKind::from_str(other).unwrap_or(ErrorKind::Unknown),
    }
}

/// The process-wide collaboration facade: agent registry, message routing,
/// request dispatch with retry/failover, and the shared scheduler,
/// knowledge base, and consensus stores. Explicitly constructed; there is
/// no hidden singleton.
pub struct Orchestrator {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    slots: RwLock<HashMap<i64, String>>,
    bus: Arc<MessageBus>,
    memory: Option<Arc<ConversationStore>>,
    failures: Arc<FailureManager>,
    scheduler: Arc<TaskScheduler>,
    knowledge: Arc<KnowledgeBase>,
    consensus: Arc<ConsensusManager>,
    intake: Arc<Mailbox>,
    processor: Mutex<Option<JoinHandle<()>>>,
    processor_running: AtomicBool,
    hook: RwLock<Option<MessageHook>>,
    total_messages: AtomicI64,
    total_requests: AtomicI64,
    total_failures: AtomicI64,
}

impl Orchestrator {
    pub fn new() -> Arc<Orchestrator> {
        Self::build(None)
    }

    /// An orchestrator whose local agents share a conversation store.
    pub fn with_memory(memory: Arc<ConversationStore>) -> Arc<Orchestrator> {
        Self::build(Some(memory))
    }

    fn build(memory: Option<Arc<ConversationStore>>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator {
            agents: RwLock::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
            bus: Arc::new(MessageBus::new()),
            memory,
            failures: Arc::new(FailureManager::new()),
            scheduler: Arc::new(TaskScheduler::new()),
            knowledge: Arc::new(KnowledgeBase::new()),
            consensus: Arc::new(ConsensusManager::new()),
            intake: Arc::new(Mailbox::default()),
            processor: Mutex::new(None),
            processor_running: AtomicBool::new(false),
            hook: RwLock::new(None),
            total_messages: AtomicI64::new(0),
            total_requests: AtomicI64::new(0),
            total_failures: AtomicI64::new(0),
        })
    }

    // ── Component access ───────────────────────────────────────

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn memory(&self) -> Option<Arc<ConversationStore>> {
        self.memory.clone()
    }

    pub fn failures(&self) -> Arc<FailureManager> {
        Arc::clone(&self.failures)
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn knowledge(&self) -> Arc<KnowledgeBase> {
        Arc::clone(&self.knowledge)
    }

    pub fn consensus(&self) -> Arc<ConsensusManager> {
        Arc::clone(&self.consensus)
    }

    pub fn set_message_hook(&self, hook: MessageHook) {
        *self.hook.write() = Some(hook);
    }

    // ── Registry ───────────────────────────────────────────────

    /// Register an agent under its id (must be unique) and attach its
    /// mailbox to the bus.
    pub fn register(&self, agent: Arc<Agent>) -> Result<()> {
        let info = agent.info();
        {
            let mut agents = self.agents.write();
            if agents.contains_key(&info.id) {
                return Err(QuorumError::DuplicateAgent(info.id));
            }
            agents.insert(info.id.clone(), Arc::clone(&agent));
        }
        self.bus.attach(&info.id, agent.mailbox());
        if let Some(slot_id) = info.slot_id {
            self.slots.write().insert(slot_id, info.id.clone());
        }
        info!(agent_id = %info.id, name = %info.name, "agent registered");
        Ok(())
    }

    /// Shut the agent down, clear its supervisor back-reference, and drop
    /// it from the registry and bus.
    pub async fn unregister(&self, agent_id: &str) -> Result<()> {
        let agent = self
            .agents
            .write()
            .remove(agent_id)
            .ok_or_else(|| QuorumError::AgentNotFound(agent_id.to_string()))?;
        agent.set_supervisor(None);
        agent.shutdown().await;
        self.bus.detach(agent_id);
        if let Some(slot_id) = agent.info().slot_id {
            self.slots.write().remove(&slot_id);
        }
        info!(agent_id, "agent unregistered");
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn get_by_slot(&self, slot_id: i64) -> Option<Arc<Agent>> {
        let agent_id = self.slots.read().get(&slot_id).cloned()?;
        self.get(&agent_id)
    }

    /// Every registered agent's info, sorted by id.
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> =
            self.agents.read().values().map(|a| a.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Capability/status/metadata discovery, sorted by id.
    pub fn find(&self, query: &AgentQuery) -> Vec<AgentInfo> {
        let mut results: Vec<AgentInfo> = self
            .agents
            .read()
            .values()
            .map(|a| a.info())
            .filter(|info| {
                if info.status < query.min_status {
                    return false;
                }
                if !query.capabilities.is_empty() {
                    let matched = if query.require_all_capabilities {
                        query.capabilities.iter().all(|c| info.has_capability(c))
                    } else {
                        query.capabilities.iter().any(|c| info.has_capability(c))
                    };
                    if !matched {
                        return false;
                    }
                }
                query
                    .metadata_filters
                    .iter()
                    .all(|(k, v)| info.metadata.get(k) == Some(v))
            })
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    // ── Agent lifecycle conveniences ───────────────────────────

    /// Create, register, and start a local agent bound to `slot_id`.
    /// Returns the new agent id.
    pub fn spawn_agent(
        &self,
        role: &str,
        capabilities: Vec<String>,
        slot_id: Option<i64>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let agent = Agent::local(role, "", capabilities, self.bus(), self.memory.clone());
        agent.set_slot(slot_id);
        for (key, value) in &metadata {
            agent.set_metadata(key, value);
        }
        let agent_id = agent.id();
        self.register(Arc::clone(&agent))?;
        agent.start();
        info!(agent_id = %agent_id, role, "agent spawned");
        Ok(agent_id)
    }

    pub async fn terminate_agent(&self, agent_id: &str) -> Result<()> {
        self.unregister(agent_id).await
    }

    // ── Messaging ──────────────────────────────────────────────

    /// Dispatch synchronously to the target's handler and return its
    /// response. Unknown targets yield a `not_found` response.
    pub async fn send_message(&self, msg: &Envelope) -> Response {
        self.total_messages.fetch_add(1, Ordering::SeqCst);
        let Some(agent) = self.get(&msg.to) else {
            return Response::failure(
                ResponseStatus::NotFound,
                ErrorKind::AgentNotFound.as_str(),
                format!("agent not found: {}", msg.to),
            );
        };
        let response = agent.handle_message(msg).await;
        {
            let hook = self.hook.read();
            if let Some(hook) = hook.as_ref() {
                hook(msg, &response);
            }
        }
        response
    }

    /// Fire-and-forget enqueue into the target's mailbox.
    pub fn post_message(&self, msg: Envelope) -> bool {
        self.total_messages.fetch_add(1, Ordering::SeqCst);
        self.bus.deliver(msg)
    }

    /// Synchronous fan-out to every agent; responses come back in id order.
    pub async fn broadcast_message(&self, msg: &Envelope) -> Vec<Response> {
        let agents: Vec<Arc<Agent>> = {
            let map = self.agents.read();
            let mut agents: Vec<Arc<Agent>> = map.values().cloned().collect();
            agents.sort_by_key(|a| a.id());
            agents
        };
        let mut responses = Vec::with_capacity(agents.len());
        for agent in agents {
            self.total_messages.fetch_add(1, Ordering::SeqCst);
            let mut copy = msg.clone();
            copy.to = agent.id();
            responses.push(agent.handle_message(&copy).await);
        }
        responses
    }

    /// Mailbox fan-out to every agent except the sender.
    pub fn broadcast_post(&self, msg: &Envelope) -> usize {
        let targets: Vec<String> = self
            .bus
            .ids()
            .into_iter()
            .filter(|id| *id != msg.from)
            .collect();
        self.total_messages.fetch_add(1, Ordering::SeqCst);
        self.bus.broadcast(msg, &targets)
    }

    // ── Request dispatch ───────────────────────────────────────

    /// One attempt against one agent, guarded by its circuit breaker. An
    /// open breaker synthesizes an `unavailable` response without invoking
    /// the target.
    pub async fn send_request(&self, agent_id: &str, request: &Request) -> Response {
        self.send_request_attempt(agent_id, request, 0, true).await
    }

    async fn send_request_attempt(
        &self,
        agent_id: &str,
        request: &Request,
        attempt: u32,
        log_failures: bool,
    ) -> Response {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let Some(agent) = self.get(agent_id) else {
            self.total_failures.fetch_add(1, Ordering::SeqCst);
            return Response::failure(
                ResponseStatus::NotFound,
                ErrorKind::AgentNotFound.as_str(),
                format!("agent not found: {agent_id}"),
            );
        };

        let breaker = self.failures.breaker(agent_id);
        if !breaker.allow_request() {
            self.total_failures.fetch_add(1, Ordering::SeqCst);
            return Response::failure(
                ResponseStatus::Unavailable,
                ErrorKind::Unavailable.as_str(),
                format!("circuit breaker open for agent {agent_id}"),
            );
        }

        let response = agent.process_request(request).await;
        if response.is_success() {
            breaker.record_success();
        } else {
            self.total_failures.fetch_add(1, Ordering::SeqCst);
            if log_failures {
                let kind = classify(&response.error_kind);
                self.failures.record_failure(
                    FailureRecord::new(agent_id, kind, response.error_message.clone())
                        .with_thread(response.thread_id.clone())
                        .with_retry_count(attempt),
                );
            } else {
                breaker.record_failure();
            }
        }
        response
    }

    /// Retry with capped exponential backoff, then fail over.
    ///
    /// Attempts run `0..=max_retries` with `delay_for(k)` sleeps between
    /// them (never after the last). Non-retryable kinds fail fast. Each
    /// attempt is bounded by the policy's `timeout_ms`. After retries are
    /// exhausted, fallback agents are tried in order; the first success is
    /// returned with a `failover_from` metadata marker.
    pub async fn send_request_with_policy(
        &self,
        agent_id: &str,
        request: &Request,
        policy: &RetryPolicy,
    ) -> Response {
        let mut last = Response::failure(
            ResponseStatus::Error,
            ErrorKind::Unknown.as_str(),
            "no attempts made",
        );

        for attempt in 0..=policy.max_retries {
            last = self
                .attempt_with_deadline(agent_id, request, attempt, policy)
                .await;
            if last.is_success() {
                return last;
            }
            let kind = classify(&last.error_kind);
            if !RetryPolicy::is_retryable(kind) {
                debug!(agent_id, kind = %kind, "non-retryable failure; not retrying");
                break;
            }
            if attempt == policy.max_retries {
                break;
            }
            let delay = policy.delay_for(attempt);
            warn!(
                agent_id,
                attempt = attempt + 1,
                max = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "request failed; retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }

        if policy.enable_failover {
            for fallback_id in &policy.fallback_agents {
                let mut response = self
                    .attempt_with_deadline(fallback_id, request, 0, policy)
                    .await;
                if response.is_success() {
                    info!(from = agent_id, to = %fallback_id, "request failed over");
                    response
                        .metadata
                        .insert("failover_from".to_string(), agent_id.to_string());
                    return response;
                }
            }
        }

        last
    }

    async fn attempt_with_deadline(
        &self,
        agent_id: &str,
        request: &Request,
        attempt: u32,
        policy: &RetryPolicy,
    ) -> Response {
        let fut = self.send_request_attempt(agent_id, request, attempt, policy.log_failures);
        if policy.timeout_ms == 0 {
            return fut.await;
        }
        match tokio::time::timeout(Duration::from_millis(policy.timeout_ms), fut).await {
            Ok(response) => response,
            Err(_) => {
                self.total_failures.fetch_add(1, Ordering::SeqCst);
                if policy.log_failures {
                    self.failures.record_failure(
                        FailureRecord::new(agent_id, ErrorKind::Timeout, "request deadline exceeded")
                            .with_retry_count(attempt),
                    );
                }
                Response::failure(
                    ResponseStatus::Timeout,
                    ErrorKind::Timeout.as_str(),
                    format!("request to {agent_id} exceeded {}ms", policy.timeout_ms),
                )
            }
        }
    }

    /// Send the same request to every listed agent. With `synthesize`, the
    /// contents are concatenated into a single per-agent report.
    pub async fn consensus_request(
        &self,
        agent_ids: &[String],
        request: &Request,
        synthesize: bool,
    ) -> ConsensusResponse {
        let mut responses = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            responses.push(self.send_request(agent_id, request).await);
        }

        let mut synthesized = String::new();
        if synthesize && !responses.is_empty() {
            synthesized.push_str("=== Multi-Agent Consensus ===\n\n");
            for (i, response) in responses.iter().enumerate() {
                synthesized.push_str(&format!("Agent {}", i + 1));
                if let Some(agent_id) = agent_ids.get(i) {
                    synthesized.push_str(&format!(" ({agent_id})"));
                }
                synthesized.push_str(":\n");
                synthesized.push_str(&response.content);
                synthesized.push_str("\n\n");
            }
        }
        ConsensusResponse {
            responses,
            synthesized,
        }
    }

    /// Pick a target for a request: a `capability` param routes to the
    /// first at-least-idle agent carrying it; otherwise the first
    /// idle/active agent wins. Ids are considered in sorted order.
    pub fn route_request(&self, request: &Request) -> Option<String> {
        if let Some(capability) = request.params.get("capability") {
            let query = AgentQuery::default()
                .with_capability(capability)
                .with_min_status(AgentStatus::Idle);
            if let Some(info) = self.find(&query).into_iter().next() {
                return Some(info.id);
            }
        }
        self.list()
            .into_iter()
            .find(|info| matches!(info.status, AgentStatus::Idle | AgentStatus::Active))
            .map(|info| info.id)
    }

    /// Demote stale agents to offline, then heartbeat everyone.
    pub fn health_check(&self) {
        let agents: Vec<Arc<Agent>> = self.agents.read().values().cloned().collect();
        for agent in agents {
            if !agent.is_healthy() {
                warn!(agent_id = %agent.id(), "agent unhealthy; marking offline");
                agent.set_status(AgentStatus::Offline);
            }
            agent.heartbeat();
        }
    }

    // ── Intake queue ───────────────────────────────────────────

    /// Enqueue a message for the background processor.
    pub fn submit_message(&self, msg: Envelope) -> bool {
        self.intake.push(msg)
    }

    /// Launch the background drain loop: pop from the intake mailbox and
    /// dispatch via `send_message`.
    pub fn start_message_processor(self: &Arc<Self>) {
        if self.processor_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            debug!("message processor started");
            while orchestrator.processor_running.load(Ordering::SeqCst) {
                let Some(msg) = orchestrator.intake.pop(Duration::from_millis(1000)).await
                else {
                    continue;
                };
                let _ = orchestrator.send_message(&msg).await;
            }
            debug!("message processor stopped");
        });
        *self.processor.lock() = Some(handle);
    }

    pub async fn stop_message_processor(&self) {
        if !self.processor_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.intake.nudge();
        let handle = { self.processor.lock().take() };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // ── Stats & persistence ────────────────────────────────────

    pub fn stats(&self) -> RegistryStats {
        let agents = self.agents.read();
        let mut stats = RegistryStats {
            total_agents: agents.len(),
            active_agents: 0,
            busy_agents: 0,
            error_agents: 0,
            offline_agents: 0,
            total_messages: self.total_messages.load(Ordering::SeqCst),
            total_requests: self.total_requests.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            agent_stats: BTreeMap::new(),
        };
        for agent in agents.values() {
            match agent.info().status {
                AgentStatus::Active | AgentStatus::Idle => stats.active_agents += 1,
                AgentStatus::Busy => stats.busy_agents += 1,
                AgentStatus::Error => stats.error_agents += 1,
                AgentStatus::Offline => stats.offline_agents += 1,
                AgentStatus::Unknown => {}
            }
            stats.agent_stats.insert(agent.id(), agent.stats());
        }
        stats
    }

    /// Registry state as JSON: agent info list plus counters.
    pub fn export_state(&self) -> Result<String> {
        let state = serde_json::json!({
            "agents": self.list(),
            "total_messages": self.total_messages.load(Ordering::SeqCst),
            "total_requests": self.total_requests.load(Ordering::SeqCst),
            "total_failures": self.total_failures.load(Ordering::SeqCst),
        });
        Ok(serde_json::to_string(&state)?)
    }

    /// Restore counters from an exported state. Agents are NOT re-created;
    /// live workers cannot be conjured from serialized info.
    pub fn import_state(&self, json: &str) -> Result<()> {
        let state: serde_json::Value = serde_json::from_str(json)?;
        let load = |key: &str| state.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
        self.total_messages.store(load("total_messages"), Ordering::SeqCst);
        self.total_requests.store(load("total_requests"), Ordering::SeqCst);
        self.total_failures.store(load("total_failures"), Ordering::SeqCst);
        Ok(())
    }

    /// Stop every agent and background task. The registry is left empty.
    pub async fn shutdown(&self) {
        self.stop_message_processor().await;
        let agents: Vec<Arc<Agent>> = {
            let mut map = self.agents.write();
            map.drain().map(|(_, agent)| agent).collect()
        };
        for agent in &agents {
            agent.set_supervisor(None);
            agent.shutdown().await;
            self.bus.detach(&agent.id());
        }
        self.slots.write().clear();
        info!(count = agents.len(), "orchestrator shut down");
    }
}
