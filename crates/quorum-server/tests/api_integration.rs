//! HTTP API integration tests: drive the router in-process, no sockets.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use quorum_runtime::Orchestrator;

fn app() -> (axum::Router, Arc<Orchestrator>) {
    let orchestrator = Orchestrator::new();
    (
        quorum_server::build_router(Arc::clone(&orchestrator)),
        orchestrator,
    )
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::get(path).body(Body::empty()).unwrap()
}

// ── Agents ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_spawn_list_get_delete_agent() {
    let (app, _orch) = app();

    let resp = app
        .clone()
        .oneshot(post(
            "/v1/agents/spawn",
            serde_json::json!({
                "role": "researcher",
                "slot_id": 2,
                "capabilities": ["search"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "spawned");
    assert_eq!(body["role"], "researcher");
    let agent_id = body["agent_id"].as_str().unwrap().to_string();

    let resp = app.clone().oneshot(get("/v1/agents")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["agents"][0]["slot_id"], 2);

    let resp = app
        .clone()
        .oneshot(get(&format!("/v1/agents/{agent_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["name"], "researcher");
    assert_eq!(body["capabilities"][0], "search");

    let resp = app
        .clone()
        .oneshot(
            Request::delete(&format!("/v1/agents/{agent_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "terminated");

    let resp = app
        .oneshot(get(&format!("/v1/agents/{agent_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_spawn_missing_role_is_400() {
    let (app, _orch) = app();
    let resp = app
        .oneshot(post("/v1/agents/spawn", serde_json::json!({ "role": "" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agent_stats_endpoint() {
    let (app, _orch) = app();
    let resp = app.oneshot(get("/v1/agents/stats")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["total_agents"], 0);
    assert!(body["total_requests"].is_number());
}

// ── Tasks ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_task_submit_get_cancel() {
    let (app, _orch) = app();

    let resp = app
        .clone()
        .oneshot(post(
            "/v1/tasks/submit",
            serde_json::json!({
                "task_id": "T1",
                "kind": "generate",
                "description": "write docs",
                "created_at": 1,
                "status": "pending",
                "priority": 5,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["task_id"], "T1");
    assert_eq!(body["status"], "submitted");

    let resp = app.clone().oneshot(get("/v1/tasks/T1")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["kind"], "generate");
    assert_eq!(body["status"], "pending");

    let resp = app.clone().oneshot(get("/v1/tasks")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["count"], 1);

    let resp = app
        .clone()
        .oneshot(Request::delete("/v1/tasks/T1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["status"], "cancelled");

    let resp = app
        .oneshot(Request::delete("/v1/tasks/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_task_get_includes_result() {
    let (app, orch) = app();
    let _ = app
        .clone()
        .oneshot(post(
            "/v1/tasks/submit",
            serde_json::json!({
                "task_id": "T2",
                "kind": "test",
                "created_at": 1,
                "status": "pending",
            }),
        ))
        .await
        .unwrap();
    orch.scheduler().complete(
        "T2",
        quorum_core::TaskResult {
            task_id: "T2".into(),
            agent_id: "a".into(),
            result: "all green".into(),
            success: true,
            error_message: String::new(),
            duration_ms: 5,
        },
    );

    let resp = app.oneshot(get("/v1/tasks/T2")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["result"], "all green");
}

#[tokio::test]
async fn test_workflow_submits_all_tasks() {
    let (app, orch) = app();
    let resp = app
        .oneshot(post(
            "/v1/tasks/workflow",
            serde_json::json!({
                "tasks": [
                    { "task_id": "W1", "kind": "analyze", "created_at": 1, "status": "pending" },
                    { "task_id": "W2", "kind": "generate", "created_at": 2, "status": "pending",
                      "dependencies": ["W1"] },
                ],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "scheduled");
    assert_eq!(body["task_ids"].as_array().unwrap().len(), 2);

    let workflow_id = body["workflow_id"].as_str().unwrap();
    let task = orch.scheduler().get_task("W1").unwrap();
    assert_eq!(task.parent_task_id, workflow_id);
}

#[tokio::test]
async fn test_empty_workflow_is_400() {
    let (app, _orch) = app();
    let resp = app
        .oneshot(post("/v1/tasks/workflow", serde_json::json!({ "tasks": [] })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Knowledge ──────────────────────────────────────────────────

#[tokio::test]
async fn test_knowledge_store_get_query() {
    let (app, _orch) = app();

    let resp = app
        .clone()
        .oneshot(post(
            "/v1/knowledge",
            serde_json::json!({
                "key": "api-design",
                "value": "use envelopes",
                "agent_id": "architect",
                "tags": ["design", "api"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(get("/v1/knowledge/api-design"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["value"], "use envelopes");
    assert_eq!(body["version"], 1);

    let resp = app
        .clone()
        .oneshot(get("/v1/knowledge/query?tags=design,api"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["count"], 1);

    let resp = app.clone().oneshot(get("/v1/knowledge/missing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(post("/v1/knowledge", serde_json::json!({ "key": "", "value": "x" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Messages ───────────────────────────────────────────────────

#[tokio::test]
async fn test_send_and_poll_messages() {
    let (app, orch) = app();
    let _ = app
        .clone()
        .oneshot(post(
            "/v1/agents/spawn",
            serde_json::json!({ "role": "sink", "capabilities": [] }),
        ))
        .await
        .unwrap();
    let agent_id = orch.list()[0].id.clone();
    // Stop the inbox loop so the diagnostic poll can observe the mailbox.
    let agent = orch.get(&agent_id).unwrap();
    agent.stop();
    agent.join().await;

    let resp = app
        .clone()
        .oneshot(post(
            "/v1/messages/send",
            serde_json::json!({
                "message_id": "m-1",
                "from": "client",
                "to": agent_id,
                "kind": "notification",
                "timestamp": 1,
                "payload": { "note": "hello" },
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["message_id"], "m-1");

    let resp = app
        .clone()
        .oneshot(get(&format!("/v1/messages/{agent_id}?max_count=10")))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["messages"][0]["payload"]["note"], "hello");

    let resp = app
        .oneshot(post(
            "/v1/messages/send",
            serde_json::json!({
                "message_id": "m-2",
                "from": "client",
                "to": "",
                "kind": "notification",
                "timestamp": 1,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_poll_unknown_agent_is_404() {
    let (app, _orch) = app();
    let resp = app.oneshot(get("/v1/messages/ghost")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Consensus ──────────────────────────────────────────────────

#[tokio::test]
async fn test_vote_create_cast_get() {
    let (app, _orch) = app();

    let resp = app
        .clone()
        .oneshot(post(
            "/v1/consensus/vote/create",
            serde_json::json!({
                "question": "merge?",
                "options": ["yes", "no"],
                "type": "simple_majority",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "created");
    let vote_id = body["vote_id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(post(
            &format!("/v1/consensus/vote/{vote_id}/cast"),
            serde_json::json!({ "agent_id": "a", "option": "yes" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(post(
            &format!("/v1/consensus/vote/{vote_id}/cast"),
            serde_json::json!({ "agent_id": "b", "option": "maybe" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(get(&format!("/v1/consensus/vote/{vote_id}")))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["question"], "merge?");
    assert_eq!(body["votes"]["a"], "yes");
    assert_eq!(body["finalized"], false);

    let resp = app
        .oneshot(get("/v1/consensus/vote/vote-missing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
