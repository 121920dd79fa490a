use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::timestamp_ms;

/// Default staleness window for heartbeat-based health checks.
pub const DEFAULT_HEALTH_TIMEOUT_MS: i64 = 60_000;

/// Externally visible agent status. The declaration order is meaningful:
/// registry queries filter on `status >= min_status`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Error,
    Offline,
    Unknown,
}

/// Registry-level description of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub endpoint: String,
    pub status: AgentStatus,
    pub last_heartbeat: i64,
    pub created_at: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Inference slot this agent is bound to, if any.
    #[serde(default)]
    pub slot_id: Option<i64>,
}

impl AgentInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let now = timestamp_ms();
        Self {
            id: crate::ids::new_id(),
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            endpoint: String::new(),
            status: AgentStatus::Idle,
            last_heartbeat: now,
            created_at: now,
            metadata: HashMap::new(),
            slot_id: None,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Healthy iff the status is not offline/error and the last heartbeat is
    /// fresher than `timeout_ms`.
    pub fn is_healthy(&self, timeout_ms: i64) -> bool {
        if matches!(self.status, AgentStatus::Offline | AgentStatus::Error) {
            return false;
        }
        timestamp_ms() - self.last_heartbeat < timeout_ms
    }
}

/// Per-agent request counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub total_tokens: i64,
    pub avg_response_time_ms: f64,
    pub last_request_time: i64,
    pub active_threads: i64,
}
