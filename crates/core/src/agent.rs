mod builder;
mod runtime;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::conversation::Conversation;
use crate::error::AgentError;
pub use crate::model_client::RetryPolicy;
pub use builder::{AgentBuilder, DEFAULT_MAX_STEPS};
use runtime::Command;

/// An agent instance, which maintains a conversation, a model provider,
/// and a toolset.
///
/// The agent runs in its own task. Methods on this handle only send
/// commands to that task, so they return immediately no matter what the
/// agent is doing. User inputs enqueued while a turn is running are
/// handled in order once it finishes.
///
/// The handle is cheap to clone. The agent stops when every handle is
/// dropped or [`Agent::try_kill`] is called.
#[derive(Clone)]
pub struct Agent {
    cmd_tx: mpsc::UnboundedSender<Command>,
    kill_tx: Arc<watch::Sender<bool>>,
    model_id: Arc<str>,
}

impl Agent {
    /// Enqueues a user input for processing.
    pub fn enqueue_user_input<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<(), AgentError> {
        self.cmd_tx
            .send(Command::UserInput(input.into()))
            .map_err(|_| AgentError::Terminated)
    }

    /// Returns a snapshot of the conversation.
    ///
    /// The snapshot is taken between turns, so this waits for the running
    /// turn (if any) to finish.
    pub async fn conversation(&self) -> Result<Conversation, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot(tx))
            .map_err(|_| AgentError::Terminated)?;
        rx.await.map_err(|_| AgentError::Terminated)
    }

    /// Returns the identifier of the model the agent talks to.
    #[inline]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Stops the agent, cancelling the running turn.
    ///
    /// Returns `false` if the agent has already stopped.
    pub fn try_kill(&self) -> bool {
        self.kill_tx.send(true).is_ok()
    }
}
