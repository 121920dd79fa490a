use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use quorum_core::timestamp_ms;

use crate::estimator;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
            TurnRole::Tool => "tool",
        }
    }
}

/// A single role-labeled message within a thread. Ordered by insertion;
/// timestamps are advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: timestamp_ms(),
            files: Vec::new(),
            images: Vec::new(),
            agent_id: String::new(),
            model: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn estimate_tokens(&self) -> i64 {
        estimator::estimate_turn(self)
    }
}

/// An ordered conversation between a user and agent(s).
///
/// Invariant: `expires_at >= updated_at`. `parent_id` is set when the
/// thread was branched from another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: String,
    #[serde(default)]
    pub parent_id: String,
    pub initiating_agent: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ConversationThread {
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn estimate_total_tokens(&self) -> i64 {
        self.turns.iter().map(|t| t.estimate_tokens()).sum()
    }
}
