use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quorum_core::{
    AgentInfo, AgentStats, AgentStatus, DEFAULT_HEALTH_TIMEOUT_MS, Envelope, MessageKind,
    QuorumError, Request, Response, ResponseStatus, Result, timestamp_ms,
};
use quorum_failure::{CircuitBreaker, RetryPolicy};
use quorum_llm::InferenceBackend;
use quorum_memory::{ConversationStore, ConversationTurn, TurnRole, estimator};

use crate::bus::MessageBus;
use crate::mailbox::Mailbox;

/// Poll interval of the inbox loop; also bounds stop latency.
const INBOX_POLL_MS: u64 = 100;

/// Runtime lifecycle of an agent's worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Created,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopping,
            4 => LifecycleState::Stopped,
            _ => LifecycleState::Failed,
        }
    }
}

/// Handler invoked for a message kind. Handlers run on the agent's worker
/// task and must not re-enter the agent's own locks.
pub type MessageHandler = Arc<dyn Fn(&Agent, &Envelope) -> Result<()> + Send + Sync>;

struct LocalDriver {
    backend: Mutex<Option<Arc<dyn InferenceBackend>>>,
    memory: Option<Arc<ConversationStore>>,
}

struct RemoteDriver {
    #[allow(dead_code)]
    endpoint: String,
}

/// Tagged driver: local agents run inference, remote agents stand in for
/// an external endpoint. Dispatch is an explicit match, not a trait tree.
enum Driver {
    Local(LocalDriver),
    Remote(RemoteDriver),
}

#[derive(Default)]
struct StatsInner {
    total_requests: AtomicI64,
    successful_requests: AtomicI64,
    failed_requests: AtomicI64,
    total_tokens: AtomicI64,
    total_response_time_ms: AtomicI64,
    last_request_time: AtomicI64,
}

/// An independently scheduled worker: id, role, capabilities, a mailbox, a
/// handler table, a circuit breaker, and a state machine driven by one
/// long-running inbox task.
pub struct Agent {
    info: Mutex<AgentInfo>,
    state: AtomicU8,
    should_stop: AtomicBool,
    mailbox: Arc<Mailbox>,
    bus: Arc<MessageBus>,
    handlers: Mutex<HashMap<MessageKind, MessageHandler>>,
    health_timeout_ms: i64,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    supervisor: Mutex<Option<String>>,
    stats: StatsInner,
    driver: Driver,
    worker: Mutex<Option<JoinHandle<()>>>,
    start_count: AtomicI64,
}

impl Agent {
    /// A local agent backed by an inference callback (set later via
    /// [`Agent::set_backend`]) and, optionally, shared conversation memory.
    pub fn local(
        name: &str,
        description: &str,
        capabilities: Vec<String>,
        bus: Arc<MessageBus>,
        memory: Option<Arc<ConversationStore>>,
    ) -> Arc<Agent> {
        let mut info = AgentInfo::new(name);
        info.description = description.to_string();
        info.capabilities = capabilities;
        info.endpoint = "local".to_string();
        Self::build(
            info,
            Driver::Local(LocalDriver {
                backend: Mutex::new(None),
                memory,
            }),
            bus,
        )
    }

    /// A remote agent placeholder for an external endpoint. Requests answer
    /// `unavailable` until a transport adapter exists.
    pub fn remote(
        endpoint: &str,
        name: &str,
        capabilities: Vec<String>,
        bus: Arc<MessageBus>,
    ) -> Arc<Agent> {
        let mut info = AgentInfo::new(if name.is_empty() { "remote-agent" } else { name });
        info.capabilities = capabilities;
        info.endpoint = endpoint.to_string();
        info.status = AgentStatus::Unknown;
        Self::build(
            info,
            Driver::Remote(RemoteDriver {
                endpoint: endpoint.to_string(),
            }),
            bus,
        )
    }

    fn build(info: AgentInfo, driver: Driver, bus: Arc<MessageBus>) -> Arc<Agent> {
        let agent = Arc::new(Agent {
            info: Mutex::new(info),
            state: AtomicU8::new(LifecycleState::Created as u8),
            should_stop: AtomicBool::new(false),
            mailbox: Arc::new(Mailbox::default()),
            bus,
            handlers: Mutex::new(HashMap::new()),
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS,
            breaker: CircuitBreaker::default(),
            retry_policy: RetryPolicy::default(),
            supervisor: Mutex::new(None),
            stats: StatsInner::default(),
            driver,
            worker: Mutex::new(None),
            start_count: AtomicI64::new(0),
        });
        agent.register_default_handlers();
        agent
    }

    fn register_default_handlers(&self) {
        self.register_handler(
            MessageKind::Heartbeat,
            Arc::new(|agent: &Agent, msg: &Envelope| {
                agent.heartbeat();
                if !msg.from.is_empty() {
                    let ack = msg.reply_from(agent.id(), MessageKind::HeartbeatAck);
                    agent.bus.deliver(ack);
                }
                Ok(())
            }),
        );
        self.register_handler(
            MessageKind::Shutdown,
            Arc::new(|agent: &Agent, _msg: &Envelope| {
                agent.should_stop.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn id(&self) -> String {
        self.info.lock().id.clone()
    }

    pub fn info(&self) -> AgentInfo {
        self.info.lock().clone()
    }

    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// How many times the worker has been (re)started.
    pub fn start_count(&self) -> i64 {
        self.start_count.load(Ordering::SeqCst)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn set_status(&self, status: AgentStatus) {
        self.info.lock().status = status;
    }

    pub fn set_slot(&self, slot_id: Option<i64>) {
        self.info.lock().slot_id = slot_id;
    }

    pub fn set_metadata(&self, key: &str, value: &str) {
        self.info
            .lock()
            .metadata
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_supervisor(&self, supervisor_id: Option<String>) {
        *self.supervisor.lock() = supervisor_id;
    }

    pub fn supervisor(&self) -> Option<String> {
        self.supervisor.lock().clone()
    }

    /// Install the inference callback. Ignored (with a warning) on remote
    /// agents.
    pub fn set_backend(&self, backend: Arc<dyn InferenceBackend>) {
        match &self.driver {
            Driver::Local(local) => *local.backend.lock() = Some(backend),
            Driver::Remote(_) => {
                warn!(agent_id = %self.id(), "ignoring inference backend on remote agent")
            }
        }
    }

    pub fn register_handler(&self, kind: MessageKind, handler: MessageHandler) {
        self.handlers.lock().insert(kind, handler);
    }

    /// Bump the heartbeat stamp.
    pub fn heartbeat(&self) {
        self.info.lock().last_heartbeat = timestamp_ms();
    }

    /// Healthy iff status is not offline/error and the heartbeat is fresh.
    pub fn is_healthy(&self) -> bool {
        self.info.lock().is_healthy(self.health_timeout_ms)
    }

    pub fn stats(&self) -> AgentStats {
        let total = self.stats.total_requests.load(Ordering::SeqCst);
        let total_time = self.stats.total_response_time_ms.load(Ordering::SeqCst);
        let active_threads = match &self.driver {
            Driver::Local(local) => local
                .memory
                .as_ref()
                .map(|m| m.agent_threads(&self.id()).len() as i64)
                .unwrap_or(0),
            Driver::Remote(_) => 0,
        };
        AgentStats {
            agent_id: self.id(),
            total_requests: total,
            successful_requests: self.stats.successful_requests.load(Ordering::SeqCst),
            failed_requests: self.stats.failed_requests.load(Ordering::SeqCst),
            total_tokens: self.stats.total_tokens.load(Ordering::SeqCst),
            avg_response_time_ms: if total > 0 {
                total_time as f64 / total as f64
            } else {
                0.0
            },
            last_request_time: self.stats.last_request_time.load(Ordering::SeqCst),
            active_threads,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Spawn the inbox loop. No-op unless the agent is created, stopped, or
    /// failed.
    pub fn start(self: &Arc<Self>) {
        let startable = [
            LifecycleState::Created,
            LifecycleState::Stopped,
            LifecycleState::Failed,
        ];
        let transitioned = startable.iter().any(|from| {
            self.state
                .compare_exchange(
                    *from as u8,
                    LifecycleState::Starting as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        });
        if !transitioned {
            return;
        }
        self.should_stop.store(false, Ordering::SeqCst);
        self.set_status(AgentStatus::Idle);
        self.start_count.fetch_add(1, Ordering::SeqCst);
        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move { agent.run().await });
        *self.worker.lock() = Some(handle);
    }

    /// Request a stop. The worker drains within one poll interval.
    pub fn stop(&self) {
        let current = self.lifecycle();
        if matches!(current, LifecycleState::Stopped | LifecycleState::Stopping) {
            return;
        }
        if current == LifecycleState::Running {
            self.state
                .store(LifecycleState::Stopping as u8, Ordering::SeqCst);
        }
        self.should_stop.store(true, Ordering::SeqCst);
        self.mailbox.nudge();
    }

    /// Wait for the worker task to exit.
    pub async fn join(&self) {
        let handle = { self.worker.lock().take() };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stop, join, close the mailbox, and go offline. Terminal.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
        self.mailbox.close();
        self.set_status(AgentStatus::Offline);
    }

    /// Leave the agent in the failed state (supervisor gave up on it).
    pub fn mark_failed(&self) {
        self.state.store(LifecycleState::Failed as u8, Ordering::SeqCst);
        self.set_status(AgentStatus::Error);
    }

    async fn run(self: Arc<Self>) {
        self.state
            .store(LifecycleState::Running as u8, Ordering::SeqCst);
        debug!(agent_id = %self.id(), "agent inbox loop started");

        while !self.should_stop.load(Ordering::SeqCst) {
            let Some(msg) = self.mailbox.pop(Duration::from_millis(INBOX_POLL_MS)).await
            else {
                if self.mailbox.is_closed() {
                    break;
                }
                continue;
            };

            match self.dispatch(&msg).await {
                Ok(()) => {
                    self.heartbeat();
                    self.breaker.record_success();
                }
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(agent_id = %self.id(), kind = ?msg.kind, error = %e, "message handler failed");
                    if let Some(supervisor_id) = self.supervisor() {
                        let notice = Envelope::new(self.id(), supervisor_id, MessageKind::Error)
                            .with_payload(serde_json::json!({ "error": e.to_string() }));
                        self.bus.deliver(notice);
                    }
                }
            }
        }

        if self.lifecycle() != LifecycleState::Failed {
            self.state
                .store(LifecycleState::Stopped as u8, Ordering::SeqCst);
        }
        debug!(agent_id = %self.id(), "agent inbox loop stopped");
    }

    async fn dispatch(self: &Arc<Self>, msg: &Envelope) -> Result<()> {
        let handler = { self.handlers.lock().get(&msg.kind).cloned() };
        if let Some(handler) = handler {
            return handler(self, msg);
        }
        self.on_message(msg).await
    }

    /// Default hook for kinds without a registered handler. Local agents
    /// answer `request` messages; everything else is dropped.
    async fn on_message(&self, msg: &Envelope) -> Result<()> {
        if msg.kind != MessageKind::Request {
            return Ok(());
        }
        let response = self.handle_message(msg).await;
        if !msg.from.is_empty() {
            let reply = msg
                .reply_from(self.id(), MessageKind::Response)
                .with_payload(serde_json::to_value(&response)?);
            self.bus.deliver(reply);
        }
        if response.status == ResponseStatus::Error {
            return Err(QuorumError::Handler(response.error_message));
        }
        Ok(())
    }

    // ── Request processing ─────────────────────────────────────

    /// Synchronous dispatch entry used by the orchestrator: parse and
    /// process, returning the handler's response.
    pub async fn handle_message(&self, msg: &Envelope) -> Response {
        match msg.kind {
            MessageKind::Request | MessageKind::Task => {
                match serde_json::from_value::<Request>(msg.payload.clone()) {
                    Ok(mut request) => {
                        if request.thread_id.is_empty() {
                            request.thread_id = msg.thread_id.clone();
                        }
                        self.process_request(&request).await
                    }
                    Err(e) => Response::failure(
                        ResponseStatus::Error,
                        "invalid_request",
                        format!("failed to parse request payload: {e}"),
                    ),
                }
            }
            MessageKind::Heartbeat => {
                self.heartbeat();
                Response::success("")
            }
            MessageKind::Shutdown => {
                self.should_stop.store(true, Ordering::SeqCst);
                self.mailbox.nudge();
                Response::success("")
            }
            _ => Response::success(""),
        }
    }

    /// Run one request to completion, updating status and stats.
    pub async fn process_request(&self, request: &Request) -> Response {
        let start = timestamp_ms();
        self.stats.total_requests.fetch_add(1, Ordering::SeqCst);
        self.stats.last_request_time.store(start, Ordering::SeqCst);
        self.set_status(AgentStatus::Busy);

        let mut response = match &self.driver {
            Driver::Local(local) => self.process_local(local, request).await,
            Driver::Remote(_) => Response::failure(
                ResponseStatus::Unavailable,
                "unavailable",
                "remote agent transport not configured",
            ),
        };
        if response.thread_id.is_empty() {
            response.thread_id = request.thread_id.clone();
        }

        self.stats
            .total_response_time_ms
            .fetch_add(timestamp_ms() - start, Ordering::SeqCst);
        if response.is_success() {
            self.stats.successful_requests.fetch_add(1, Ordering::SeqCst);
            self.stats
                .total_tokens
                .fetch_add(response.tokens_used, Ordering::SeqCst);
            self.set_status(AgentStatus::Idle);
        } else {
            self.stats.failed_requests.fetch_add(1, Ordering::SeqCst);
            // Inference blew up: the agent itself is suspect. Anything else
            // (no backend, bad payload) leaves it serviceable.
            self.set_status(if response.error_kind == "inference_error" {
                AgentStatus::Error
            } else {
                AgentStatus::Idle
            });
        }
        response
    }

    async fn process_local(&self, local: &LocalDriver, request: &Request) -> Response {
        let backend = { local.backend.lock().clone() };
        let Some(backend) = backend else {
            return Response::failure(
                ResponseStatus::Error,
                "no_inference_callback",
                "no inference backend configured for local agent",
            );
        };

        let full_request = if !request.thread_id.is_empty() {
            match &local.memory {
                Some(memory) => memory.reconstruct_request(request),
                None => request.clone(),
            }
        } else {
            request.clone()
        };

        let mut params = full_request.params.clone();
        params.insert(
            quorum_llm::PARAM_MAX_TOKENS.to_string(),
            full_request.max_tokens.to_string(),
        );
        params.insert(
            quorum_llm::PARAM_TEMPERATURE.to_string(),
            full_request.temperature.to_string(),
        );

        let content = match backend.infer(&full_request.prompt, &params).await {
            Ok(content) => content,
            Err(e) => {
                return Response::failure(ResponseStatus::Error, "inference_error", e.to_string());
            }
        };

        let mut response = Response::success(content.clone());
        response.tokens_used = estimator::estimate_text(&content);

        // Record the exchange: the user turn carries the original prompt,
        // never the reconstructed one.
        if let Some(memory) = &local.memory {
            let thread_id = if request.thread_id.is_empty() {
                memory.create_thread(&self.id(), request)
            } else {
                request.thread_id.clone()
            };
            let user_turn = ConversationTurn::new(TurnRole::User, &request.prompt)
                .with_files(request.files.clone())
                .with_images(request.images.clone())
                .with_agent(self.id());
            let _ = memory.add_turn(&thread_id, user_turn);
            let assistant_turn =
                ConversationTurn::new(TurnRole::Assistant, &content).with_agent(self.id());
            let _ = memory.add_turn(&thread_id, assistant_turn);
            response.thread_id = thread_id;
        }
        response
    }

    /// Send a message to another agent through the bus.
    pub fn send_to(&self, to: &str, kind: MessageKind, payload: serde_json::Value) -> bool {
        let msg = Envelope::new(self.id(), to, kind).with_payload(payload);
        self.bus.deliver(msg)
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.info.lock().id)
            .field("state", &self.lifecycle())
            .finish()
    }
}
