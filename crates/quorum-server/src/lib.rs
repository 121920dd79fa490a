//! # quorum-server
//!
//! Thin axum adapter over an [`Orchestrator`]. Every route is a direct
//! translation of an in-process operation; the kernel neither knows nor
//! cares that HTTP exists.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::debug;

use quorum_core::{ConsensusRule, Envelope, MessageKind, Task};
use quorum_runtime::Orchestrator;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Shared server state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the v1 router over an orchestrator.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = Arc::new(AppState { orchestrator });

    Router::new()
        .route("/v1/agents/spawn", post(spawn_agent))
        .route("/v1/agents/stats", get(agent_stats))
        .route("/v1/agents", get(list_agents))
        .route("/v1/agents/{id}", get(get_agent).delete(terminate_agent))
        .route("/v1/tasks/submit", post(submit_task))
        .route("/v1/tasks/workflow", post(submit_workflow))
        .route("/v1/tasks", get(list_tasks))
        .route("/v1/tasks/{id}", get(get_task).delete(cancel_task))
        .route("/v1/knowledge", post(store_knowledge))
        .route("/v1/knowledge/query", get(query_knowledge))
        .route("/v1/knowledge/{key}", get(get_knowledge))
        .route("/v1/messages/send", post(send_message))
        .route("/v1/messages/broadcast", post(broadcast_message))
        .route("/v1/messages/{agent_id}", get(poll_messages))
        .route("/v1/consensus/vote/create", post(create_vote))
        .route("/v1/consensus/vote/{vid}/cast", post(cast_vote))
        .route("/v1/consensus/vote/{vid}", get(get_vote))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

fn not_found(message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": message.into() })),
    )
}

// ── Agents ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SpawnRequest {
    role: String,
    #[serde(default)]
    slot_id: Option<i64>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    config: HashMap<String, String>,
}

async fn spawn_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SpawnRequest>,
) -> ApiResult {
    if body.role.is_empty() {
        return Err(bad_request("missing role"));
    }
    let agent_id = state
        .orchestrator
        .spawn_agent(&body.role, body.capabilities, body.slot_id, body.config)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("spawn failed: {e}") })),
            )
        })?;
    debug!(agent_id = %agent_id, role = %body.role, "agent spawned over http");
    Ok(Json(json!({
        "agent_id": agent_id,
        "role": body.role,
        "slot_id": body.slot_id,
        "status": "spawned",
    })))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Value> {
    let agents = state.orchestrator.list();
    Json(json!({ "count": agents.len(), "agents": agents }))
}

async fn get_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let agent = state
        .orchestrator
        .get(&id)
        .ok_or_else(|| not_found(format!("agent not found: {id}")))?;
    Ok(Json(serde_json::to_value(agent.info()).unwrap_or(Value::Null)))
}

async fn terminate_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state
        .orchestrator
        .terminate_agent(&id)
        .await
        .map_err(|e| not_found(e.to_string()))?;
    Ok(Json(json!({
        "success": true,
        "agent_id": id,
        "status": "terminated",
    })))
}

async fn agent_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::to_value(state.orchestrator.stats()).unwrap_or(Value::Null))
}

// ── Tasks ──────────────────────────────────────────────────────

async fn submit_task(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> ApiResult {
    let task: Task = serde_json::from_value(body).map_err(|e| bad_request(e.to_string()))?;
    let task_id = task.task_id.clone();
    state.orchestrator.scheduler().submit(task);
    Ok(Json(json!({ "task_id": task_id, "status": "submitted" })))
}

#[derive(Deserialize)]
struct WorkflowRequest {
    tasks: Vec<Value>,
}

async fn submit_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WorkflowRequest>,
) -> ApiResult {
    if body.tasks.is_empty() {
        return Err(bad_request("workflow has no tasks"));
    }
    let workflow_id = quorum_core::new_id();
    let mut task_ids = Vec::with_capacity(body.tasks.len());
    let mut tasks = Vec::with_capacity(body.tasks.len());
    for raw in body.tasks {
        let mut task: Task =
            serde_json::from_value(raw).map_err(|e| bad_request(e.to_string()))?;
        task.parent_task_id = workflow_id.clone();
        task_ids.push(task.task_id.clone());
        tasks.push(task);
    }
    let scheduler = state.orchestrator.scheduler();
    for task in tasks {
        scheduler.submit(task);
    }
    Ok(Json(json!({
        "workflow_id": workflow_id,
        "task_ids": task_ids,
        "status": "scheduled",
    })))
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let scheduler = state.orchestrator.scheduler();
    let task = scheduler
        .get_task(&id)
        .ok_or_else(|| not_found(format!("task not found: {id}")))?;
    let mut body = serde_json::to_value(task).unwrap_or(Value::Null);
    if let Some(result) = scheduler.get_result(&id) {
        body["result"] = serde_json::to_value(result).unwrap_or(Value::Null);
    }
    Ok(Json(body))
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tasks = state.orchestrator.scheduler().all_tasks();
    Json(json!({ "count": tasks.len(), "tasks": tasks }))
}

async fn cancel_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let scheduler = state.orchestrator.scheduler();
    if scheduler.get_task(&id).is_none() {
        return Err(not_found(format!("task not found: {id}")));
    }
    scheduler.cancel(&id);
    Ok(Json(json!({ "success": true, "status": "cancelled" })))
}

// ── Knowledge ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct KnowledgeRequest {
    key: String,
    value: String,
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn store_knowledge(
    State(state): State<Arc<AppState>>,
    Json(body): Json<KnowledgeRequest>,
) -> ApiResult {
    if body.key.is_empty() {
        return Err(bad_request("missing key"));
    }
    state
        .orchestrator
        .knowledge()
        .put(&body.key, &body.value, &body.agent_id, body.tags);
    Ok(Json(json!({ "success": true, "key": body.key })))
}

async fn get_knowledge(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> ApiResult {
    let entry = state
        .orchestrator
        .knowledge()
        .get(&key)
        .ok_or_else(|| not_found(format!("knowledge not found: {key}")))?;
    Ok(Json(serde_json::to_value(entry).unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
struct TagQuery {
    #[serde(default)]
    tags: String,
}

async fn query_knowledge(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TagQuery>,
) -> Json<Value> {
    let tags: Vec<String> = params
        .tags
        .split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let entries = state.orchestrator.knowledge().query(&tags);
    Json(json!({ "count": entries.len(), "entries": entries }))
}

// ── Messages ───────────────────────────────────────────────────

async fn send_message(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> ApiResult {
    let msg: Envelope = serde_json::from_value(body).map_err(|e| bad_request(e.to_string()))?;
    if msg.to.is_empty() {
        return Err(bad_request("missing target agent"));
    }
    let message_id = msg.message_id.clone();
    state.orchestrator.post_message(msg);
    Ok(Json(json!({ "success": true, "message_id": message_id })))
}

async fn broadcast_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    let mut msg: Envelope =
        serde_json::from_value(body).map_err(|e| bad_request(e.to_string()))?;
    msg.to = String::new();
    msg.kind = MessageKind::Broadcast;
    let message_id = msg.message_id.clone();
    state.orchestrator.broadcast_post(&msg);
    Ok(Json(json!({ "success": true, "message_id": message_id })))
}

#[derive(Deserialize)]
struct PollQuery {
    #[serde(default = "default_max_count")]
    max_count: usize,
}

fn default_max_count() -> usize {
    100
}

/// Diagnostic mailbox poll. Drains up to `max_count` messages directly
/// from the agent's mailbox; with a running inbox loop this races the
/// agent and should only be used for passive (never-started) agents.
async fn poll_messages(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(params): Query<PollQuery>,
) -> ApiResult {
    let mailbox = state
        .orchestrator
        .bus()
        .mailbox(&agent_id)
        .ok_or_else(|| not_found(format!("agent not found: {agent_id}")))?;
    let mut messages = Vec::new();
    while messages.len() < params.max_count {
        match mailbox.try_pop() {
            Some(msg) => messages.push(msg),
            None => break,
        }
    }
    Ok(Json(json!({ "count": messages.len(), "messages": messages })))
}

// ── Consensus ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateVoteRequest {
    question: String,
    options: Vec<String>,
    #[serde(rename = "type")]
    rule: ConsensusRule,
    #[serde(default)]
    deadline: i64,
}

async fn create_vote(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateVoteRequest>,
) -> ApiResult {
    if body.question.is_empty() || body.options.is_empty() {
        return Err(bad_request("question and options are required"));
    }
    let vote_id = state.orchestrator.consensus().create_ballot(
        &body.question,
        body.options,
        body.rule,
        body.deadline,
    );
    Ok(Json(json!({ "vote_id": vote_id, "status": "created" })))
}

#[derive(Deserialize)]
struct CastVoteRequest {
    agent_id: String,
    option: String,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

async fn cast_vote(
    State(state): State<Arc<AppState>>,
    Path(vid): Path<String>,
    Json(body): Json<CastVoteRequest>,
) -> ApiResult {
    state
        .orchestrator
        .consensus()
        .cast(&vid, &body.agent_id, &body.option, body.weight)
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(json!({
        "success": true,
        "vote_id": vid,
        "agent_id": body.agent_id,
    })))
}

async fn get_vote(State(state): State<Arc<AppState>>, Path(vid): Path<String>) -> ApiResult {
    let ballot = state
        .orchestrator
        .consensus()
        .ballot(&vid)
        .ok_or_else(|| not_found(format!("vote not found: {vid}")))?;
    Ok(Json(serde_json::to_value(ballot).unwrap_or(Value::Null)))
}
