use std::sync::Arc;

use fairweather_model::{ModelMessage, ModelRequest};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::conversation::{
    Conversation, Item as ConversationItem, TranscriptSource,
};
use crate::error::AgentError;
use crate::model_client::ModelClient;
use crate::tool::Executor as ToolExecutor;

pub(crate) enum Command {
    UserInput(String),
    Snapshot(oneshot::Sender<Conversation>),
}

#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_transcript:
        Option<Box<dyn Fn(&str, TranscriptSource) + Send + Sync>>,
    pub on_message_delta: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&AgentError) + Send + Sync>>,
}

pub(crate) struct AgentState {
    pub model_client: ModelClient,
    pub tool_executor: ToolExecutor,
    pub system_prompt: Option<String>,
    pub conversation: Conversation,
    pub max_steps: usize,
    pub callbacks: Callbacks,
}

pub(crate) async fn run_agent(
    mut state: AgentState,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut kill_rx: watch::Receiver<bool>,
) {
    let span = debug_span!("agent", model = state.model_client.model_id());
    async move {
        debug!("agent started");
        let mut idle_pending = false;
        loop {
            // Inputs enqueued during a turn are handled before reporting
            // idle.
            if idle_pending && cmd_rx.is_empty() {
                idle_pending = false;
                state.notify_idle();
            }

            let cmd = tokio::select! {
                biased;
                _ = kill_rx.changed() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            match cmd {
                Command::UserInput(input) => {
                    tokio::select! {
                        biased;
                        _ = kill_rx.changed() => {
                            debug!("killed during a turn");
                            break;
                        }
                        _ = state.run_turn(input) => {}
                    }
                    idle_pending = true;
                }
                Command::Snapshot(tx) => {
                    tx.send(state.conversation.clone()).ok();
                }
            }
        }
        debug!("agent will terminate");
    }
    .instrument(span)
    .await
}

impl AgentState {
    async fn run_turn(&mut self, input: String) {
        self.push_item(
            ModelMessage::User(input.clone()),
            input,
            TranscriptSource::User,
        );

        for step in 1..=self.max_steps {
            trace!("step {step} of the turn");
            let request = self.build_model_request();
            let on_delta = self.callbacks.on_message_delta.clone();
            let resp = self
                .model_client
                .send_request(request, move |delta| {
                    if let Some(on_delta) = &on_delta {
                        on_delta(&delta);
                    }
                })
                .await;
            let resp = match resp {
                Ok(resp) => resp,
                Err(err) => {
                    self.report_error(&AgentError::from_model(err.as_ref()));
                    return;
                }
            };

            let transcript = resp.transcript;
            let msg = match resp.opaque_msg {
                Some(opaque_msg) => ModelMessage::Opaque(opaque_msg),
                // Downgrade to a text-only message.
                None => ModelMessage::Assistant(transcript.clone()),
            };
            self.push_item(msg, transcript, TranscriptSource::Assistant);

            if resp.tool_calls.is_empty() {
                return;
            }
            let results =
                self.tool_executor.handle_requests(resp.tool_calls).await;
            for result in results {
                let transcript = result.content.clone();
                self.push_item(
                    ModelMessage::Tool(result),
                    transcript,
                    TranscriptSource::Tool,
                );
            }
        }

        self.report_error(&AgentError::StepLimitExceeded(self.max_steps));
    }

    fn build_model_request(&self) -> ModelRequest {
        let system = self
            .system_prompt
            .iter()
            .map(|prompt| ModelMessage::System(prompt.clone()));
        ModelRequest {
            messages: system
                .chain(self.conversation.messages().cloned())
                .collect(),
            tools: self.tool_executor.definitions(),
        }
    }

    fn push_item(
        &mut self,
        msg: ModelMessage,
        transcript: String,
        source: TranscriptSource,
    ) {
        if let Some(on_transcript) = &self.callbacks.on_transcript {
            let skip = source == TranscriptSource::Assistant
                && transcript.is_empty();
            if !skip {
                on_transcript(&transcript, source);
            }
        }
        self.conversation.items.push(ConversationItem {
            msg,
            transcript,
            source,
        });
    }

    fn report_error(&self, err: &AgentError) {
        warn!("turn ended with an error: {err}");
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(err);
        }
    }

    fn notify_idle(&self) {
        trace!("agent is idle");
        if let Some(on_idle) = &self.callbacks.on_idle {
            on_idle();
        }
    }
}
