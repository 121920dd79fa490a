use thiserror::Error;

use crate::failure::ErrorKind;

/// Unified error type for the Quorum runtime.
#[derive(Error, Debug)]
pub enum QuorumError {
    // ── Registry / routing ─────────────────────────────────────
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),

    // ── Conversation memory ────────────────────────────────────
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("thread expired: {0}")]
    ThreadExpired(String),

    // ── Scheduling / consensus ─────────────────────────────────
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("vote not found: {0}")]
    VoteNotFound(String),

    #[error("vote already finalized: {0}")]
    VoteFinalized(String),

    #[error("option not on the ballot: {0}")]
    InvalidOption(String),

    // ── Messaging ──────────────────────────────────────────────
    #[error("mailbox closed")]
    MailboxClosed,

    #[error("mailbox full")]
    MailboxFull,

    // ── Inference ──────────────────────────────────────────────
    #[error("no inference backend configured")]
    NoInferenceBackend,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuorumError {
    /// Map this error onto the wire-level failure classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuorumError::AgentNotFound(_) => ErrorKind::AgentNotFound,
            QuorumError::DuplicateAgent(_) => ErrorKind::InvalidRequest,
            QuorumError::ThreadNotFound(_) => ErrorKind::ThreadNotFound,
            QuorumError::ThreadExpired(_) => ErrorKind::ContextExpired,
            QuorumError::TaskNotFound(_) => ErrorKind::InvalidRequest,
            QuorumError::VoteNotFound(_) => ErrorKind::InvalidRequest,
            QuorumError::VoteFinalized(_) => ErrorKind::InvalidRequest,
            QuorumError::InvalidOption(_) => ErrorKind::InvalidRequest,
            QuorumError::MailboxClosed => ErrorKind::Offline,
            QuorumError::MailboxFull => ErrorKind::Overload,
            QuorumError::NoInferenceBackend => ErrorKind::Unavailable,
            QuorumError::Inference(_) => ErrorKind::InternalError,
            QuorumError::Handler(_) => ErrorKind::InternalError,
            QuorumError::Timeout(_) => ErrorKind::Timeout,
            QuorumError::Serialization(_) => ErrorKind::InvalidResponse,
            QuorumError::Io(_) => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, QuorumError>;
