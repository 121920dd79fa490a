use serde::{Deserialize, Serialize};

use crate::ids::{new_id, timestamp_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// A schedulable unit of work. Dependencies form a DAG; a task is eligible
/// for dispatch only once every dependency is `completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Empty = any role may pick this up.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// 0–10, higher dispatches first.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub parent_task_id: String,
    #[serde(default = "timestamp_ms")]
    pub created_at: i64,
    /// 0 = no deadline.
    #[serde(default)]
    pub deadline: i64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_agent_id: String,
}

impl Task {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: new_id(),
            kind: kind.into(),
            description: description.into(),
            parameters: serde_json::Value::Null,
            dependencies: Vec::new(),
            required_roles: Vec::new(),
            priority: 0,
            parent_task_id: String::new(),
            created_at: timestamp_ms(),
            deadline: 0,
            status: TaskStatus::Pending,
            assigned_agent_id: String::new(),
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_required_roles(mut self, roles: Vec<String>) -> Self {
        self.required_roles = roles;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Outcome of a task, written at most once per task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub result: String,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub duration_ms: i64,
}
