//! # quorum-llm
//!
//! The inference seam of the Quorum runtime. The kernel never talks to a
//! model directly: it hands a prompt and a string parameter map to an
//! [`InferenceBackend`] and gets text back. Real engines live behind this
//! trait; the crate ships a closure adapter and a queued mock for tests.

pub mod backend;
pub mod mock;

pub use backend::{FnBackend, InferenceBackend, PARAM_MAX_TOKENS, PARAM_TEMPERATURE};
pub use mock::MockBackend;
