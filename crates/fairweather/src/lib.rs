//! A weather assistant built on a Gemini model.
//!
//! The assistant knows a single tool, [`get_weather`](tools::get_weather),
//! which reports that it is always sunny. Use [`assemble_agent`] to wire
//! the tool and an optional instruction into an agent for any model
//! provider, and [`gemini_provider`] for the default model handle.
//!
//! ```no_run
//! # async fn run() {
//! use fairweather::{DEFAULT_SYSTEM_PROMPT, assemble_agent, gemini_provider};
//!
//! let agent = assemble_agent(
//!     gemini_provider("<api key>"),
//!     Some(DEFAULT_SYSTEM_PROMPT),
//! )
//! .build();
//! agent.enqueue_user_input("What is the weather in Paris?").ok();
//! # }
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod tools;

use fairweather_core::AgentBuilder;
use fairweather_gemini_model::{GeminiConfigBuilder, GeminiProvider};
use fairweather_model::ModelProvider;

pub use fairweather_gemini_model::DEFAULT_MODEL;
use tools::GetWeatherTool;

/// The instruction given to the assistant unless told otherwise.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Prepares an agent that can answer weather questions.
///
/// The returned builder has the weather tool registered and, if given,
/// the system prompt set. Attach callbacks before building it.
pub fn assemble_agent<P: ModelProvider + 'static>(
    provider: P,
    system_prompt: Option<&str>,
) -> AgentBuilder {
    debug!(
        "assembling agent for {} (system prompt: {})",
        provider.model_id(),
        system_prompt.is_some()
    );
    let builder = AgentBuilder::with_model_provider(provider)
        .with_tool(GetWeatherTool::new());
    match system_prompt {
        Some(prompt) => builder.with_system_prompt(prompt),
        None => builder,
    }
}

/// Picks the system prompt from an optional override.
///
/// No override means [`DEFAULT_SYSTEM_PROMPT`], an empty one means no
/// instruction at all, and anything else is used as given.
pub fn resolve_system_prompt(prompt: Option<String>) -> Option<String> {
    match prompt {
        None => Some(DEFAULT_SYSTEM_PROMPT.to_owned()),
        Some(prompt) if prompt.is_empty() => None,
        Some(prompt) => Some(prompt),
    }
}

/// Creates a provider for [`DEFAULT_MODEL`] on the public Gemini API.
pub fn gemini_provider<S: Into<String>>(api_key: S) -> GeminiProvider {
    let config = GeminiConfigBuilder::with_api_key(api_key)
        .with_model(DEFAULT_MODEL)
        .build();
    GeminiProvider::new(config)
}

/// Re-exports of [`fairweather_core`] crate.
pub mod core {
    pub use fairweather_core::*;
}
