//! # quorum-runtime
//!
//! The collaboration kernel: per-agent mailboxes and the message bus, the
//! agent actor runtime, supervisors with restart strategies, the
//! dependency-aware task scheduler, the consensus voter, the shared
//! knowledge base, the document coordinator, and the orchestrator that
//! ties them together.

pub mod agent;
pub mod bus;
pub mod consensus;
pub mod coordinator;
pub mod knowledge;
pub mod mailbox;
pub mod orchestrator;
pub mod scheduler;
pub mod supervisor;

pub use agent::{Agent, LifecycleState, MessageHandler};
pub use bus::MessageBus;
pub use consensus::ConsensusManager;
pub use coordinator::{DocCoordinator, DocSection};
pub use knowledge::KnowledgeBase;
pub use mailbox::{Mailbox, DEFAULT_MAILBOX_CAPACITY};
pub use orchestrator::{AgentQuery, ConsensusResponse, Orchestrator, RegistryStats};
pub use scheduler::TaskScheduler;
pub use supervisor::{RestartStrategy, Supervisor, SupervisorConfig};
