use std::error::Error;
use std::fmt::{self, Display};

use fairweather_model::{ErrorKind, ModelProviderError};

/// An error that ended an agent turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentError {
    /// The model provider failed, after retries if the failure was
    /// transient.
    Model {
        /// The kind reported by the provider.
        kind: ErrorKind,
        /// The provider's error message.
        message: String,
    },
    /// The model kept calling tools for more steps than allowed.
    StepLimitExceeded(usize),
    /// The agent task is no longer running.
    Terminated,
}

impl AgentError {
    pub(crate) fn from_model(err: &dyn ModelProviderError) -> Self {
        AgentError::Model {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Model { kind, message } => {
                write!(f, "model request failed ({kind}): {message}")
            }
            AgentError::StepLimitExceeded(steps) => {
                write!(f, "stopped after {steps} model steps")
            }
            AgentError::Terminated => write!(f, "the agent has terminated"),
        }
    }
}

impl Error for AgentError {}
