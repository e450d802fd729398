use std::sync::Arc;

use fairweather_model::ModelProvider;
use tokio::sync::{mpsc, watch};

use super::Agent;
use super::runtime::{AgentState, Callbacks, run_agent};
use crate::conversation::TranscriptSource;
use crate::error::AgentError;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{AnyTool, Executor as ToolExecutor, Tool, ToolObject};

/// The number of model requests one user input may cause when no limit
/// is set.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    system_prompt: Option<String>,
    tools: Vec<Box<dyn ToolObject>>,
    max_steps: usize,
    callbacks: Callbacks,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            tools: vec![],
            max_steps: DEFAULT_MAX_STEPS,
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the instructions sent ahead of the conversation in every
    /// request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    ///
    /// Tools are declared to the model in registration order. Registering
    /// a second tool with the same name replaces the first one in place.
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let tool: Box<dyn ToolObject> = Box::new(AnyTool(tool));
        let existing =
            self.tools.iter().position(|other| other.name() == tool.name());
        match existing {
            Some(idx) => {
                warn!(
                    "tool `{}` is registered twice, keeping the last",
                    tool.name()
                );
                self.tools[idx] = tool;
            }
            None => self.tools.push(tool),
        }
        self
    }

    /// Limits how many model requests a single user input may cause.
    ///
    /// A value of `0` is treated as `1`.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Sets how rate limited model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.model_client.set_retry_policy(retry_policy);
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback to be invoked for every item added to the
    /// conversation, with the item's transcript.
    ///
    /// Assistant items with no text (pure tool calls) are not reported.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_transcript = Some(Box::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked with each text delta while the
    /// model is streaming.
    #[inline]
    pub fn on_message_delta(
        mut self,
        on_message_delta: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_message_delta = Some(Arc::new(on_message_delta));
        self
    }

    /// Attaches a callback to be invoked when a turn ends with an error.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&AgentError) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_error = Some(Box::new(on_error));
        self
    }

    /// Returns the identifier of the model the agent will talk to.
    #[inline]
    pub fn model_id(&self) -> &str {
        self.model_client.model_id()
    }

    /// Returns the system prompt, if one is set.
    #[inline]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Returns the names of the registered tools, in registration order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// Builds the agent and starts its task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Agent {
        let Self {
            model_client,
            system_prompt,
            tools,
            max_steps,
            callbacks,
        } = self;

        let model_id = Arc::from(model_client.model_id());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);

        let state = AgentState {
            model_client,
            tool_executor: ToolExecutor::with_tools(tools),
            system_prompt,
            conversation: Default::default(),
            max_steps,
            callbacks,
        };
        tokio::spawn(run_agent(state, cmd_rx, kill_rx));

        Agent {
            cmd_tx,
            kill_tx: Arc::new(kill_tx),
            model_id,
        }
    }
}
