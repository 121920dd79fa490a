use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::timestamp_ms;

/// Classification of a failure. Serialized as the lowercase snake_case
/// strings below; unrecognized strings parse to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Timeout,
    Connection,
    Unavailable,
    Overload,
    InvalidRequest,
    InvalidResponse,
    Authentication,
    Authorization,
    RateLimit,
    ContextExpired,
    ThreadNotFound,
    AgentNotFound,
    Offline,
    InternalError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Overload => "overload",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ContextExpired => "context_expired",
            ErrorKind::ThreadNotFound => "thread_not_found",
            ErrorKind::AgentNotFound => "agent_not_found",
            ErrorKind::Offline => "offline",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "none" => ErrorKind::None,
            "timeout" => ErrorKind::Timeout,
            "connection" => ErrorKind::Connection,
            "unavailable" => ErrorKind::Unavailable,
            "overload" => ErrorKind::Overload,
            "invalid_request" => ErrorKind::InvalidRequest,
            "invalid_response" => ErrorKind::InvalidResponse,
            "authentication" => ErrorKind::Authentication,
            "authorization" => ErrorKind::Authorization,
            "rate_limit" => ErrorKind::RateLimit,
            "context_expired" => ErrorKind::ContextExpired,
            "thread_not_found" => ErrorKind::ThreadNotFound,
            "agent_not_found" => ErrorKind::AgentNotFound,
            "offline" => ErrorKind::Offline,
            "internal_error" => ErrorKind::InternalError,
            _ => ErrorKind::Unknown,
        })
    }
}

/// One observed failure, kept in per-agent history and dead-letter entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub agent_id: String,
    #[serde(rename = "error_kind")]
    pub kind: ErrorKind,
    #[serde(default)]
    pub error_message: String,
    pub timestamp: i64,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub recovered: bool,
    #[serde(default)]
    pub recovery_agent: String,
}

impl FailureRecord {
    pub fn new(
        agent_id: impl Into<String>,
        kind: ErrorKind,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind,
            error_message: error_message.into(),
            timestamp: timestamp_ms(),
            thread_id: String::new(),
            message_id: String::new(),
            retry_count: 0,
            recovered: false,
            recovery_agent: String::new(),
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }
}
