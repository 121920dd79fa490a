//! # quorum-core
//!
//! Core types, identifiers, and wire formats for the Quorum multi-agent
//! collaboration runtime. This crate defines the shared vocabulary used by
//! every other crate in the workspace.

pub mod error;
pub mod failure;
pub mod ids;
pub mod info;
pub mod knowledge;
pub mod message;
pub mod task;
pub mod vote;

pub use error::{QuorumError, Result};
pub use failure::{ErrorKind, FailureRecord};
pub use ids::{new_id, timestamp_ms};
pub use info::{AgentInfo, AgentStats, AgentStatus, DEFAULT_HEALTH_TIMEOUT_MS};
pub use knowledge::KnowledgeEntry;
pub use message::{
    ContinuationOffer, Envelope, MessageKind, Request, Response, ResponseStatus,
};
pub use task::{Task, TaskResult, TaskStatus};
pub use vote::{Ballot, ConsensusRule};
