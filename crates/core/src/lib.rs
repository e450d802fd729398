//! The agent factory and runtime: tool registration, the tool-calling
//! loop, conversation history and retries.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder, DEFAULT_MAX_STEPS, RetryPolicy};
pub use conversation::TranscriptSource;
pub use error::AgentError;
