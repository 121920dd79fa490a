use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{new_id, timestamp_ms};

/// Every kind of message an agent can receive. The first block is the
/// request/response vocabulary; the rest drive the actor runtime
/// (heartbeats, tasks, document locks, consensus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Error,
    Heartbeat,
    HeartbeatAck,
    Broadcast,
    Shutdown,
    Task,
    TaskResult,
    LockRequest,
    LockRelease,
    LockAcquired,
    LockDenied,
    DocEdit,
    DocUpdate,
    Consensus,
}

/// Immutable message envelope. An empty `to` means broadcast.
///
/// Invariant: `(from, message_id)` is unique per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: i64,
    /// Advisory priority 0–10 (higher = more urgent). Mailboxes do not reorder.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Envelope {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            message_id: new_id(),
            from: from.into(),
            to: to.into(),
            kind,
            thread_id: String::new(),
            payload: serde_json::Value::Null,
            timestamp: timestamp_ms(),
            priority: 0,
            correlation_id: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    /// Build a reply envelope: addressed back to the sender, correlated to
    /// this message, same thread.
    pub fn reply_from(&self, from: impl Into<String>, kind: MessageKind) -> Envelope {
        let mut reply = Envelope::new(from, self.from.clone(), kind);
        reply.correlation_id = self.message_id.clone();
        reply.thread_id = self.thread_id.clone();
        reply
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }
}

/// Status of an agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    ContinuationRequired,
    Timeout,
    NotFound,
    Unavailable,
}

/// A unit of work for an agent. A non-empty `thread_id` continues an
/// existing conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub prompt: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// 0 = no limit.
    #[serde(default)]
    pub max_tokens: i32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: String,
}

impl Request {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// What came back from an agent.
///
/// `error_kind` is a free-form kind string (e.g. `"unavailable"`,
/// `"inference_error"`, `"no_inference_callback"`); kinds that appear in
/// [`crate::ErrorKind`] use the same spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub error_kind: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Response {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            content: content.into(),
            thread_id: String::new(),
            tokens_used: 0,
            error_kind: String::new(),
            error_message: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn failure(
        status: ResponseStatus,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            content: String::new(),
            thread_id: String::new(),
            tokens_used: 0,
            error_kind: error_kind.into(),
            error_message: error_message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// A response-side hint that the conversation may be continued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationOffer {
    pub continuation_id: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub remaining_turns: i32,
    pub expires_at: i64,
}
