//! A scripted local model for testing agents without network access.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use fairweather_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    preset: PresetResponse,
    step_idx: usize,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        let preset_events = &this.preset.events;
        if this.event_idx > preset_events.len() {
            return Poll::Ready(Ok(None));
        }

        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(this.delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = match preset_events.get(this.event_idx) {
            Some(PresetEvent::MessageDelta(msg)) => {
                ModelResponseEvent::MessageDelta(msg.clone())
            }
            Some(PresetEvent::ToolCall(req)) => {
                ModelResponseEvent::ToolCall(req.clone())
            }
            None => ModelResponseEvent::Completed(
                if this.preset.has_tool_call() {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                },
            ),
        };
        this.event_idx += 1;
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        if self.event_idx <= self.preset.events.len() {
            return None;
        }
        let id = format!("msg:{}", self.step_idx);
        Some(OpaqueMessage::new(id, self.preset.clone()))
    }
}

#[derive(Clone, Debug)]
enum ConversationStep {
    UserInput,
    ToolResult,
    AssistantResponse(PresetResponse),
}

#[derive(Default)]
struct Recorder {
    requests: Vec<ModelRequest>,
    attempts: HashMap<usize, u64>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, set up the conversation script: how the model
/// should respond at each position of the conversation. A request is
/// answered by the step whose index equals the number of non-system
/// messages in it, so a script reads like the conversation it expects:
///
/// ```text
/// user input, assistant (tool call), tool result, assistant (answer)
/// ```
///
/// If the script has no step for a request, or the step is not an
/// assistant step, the request fails.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone)]
pub struct TestModelProvider {
    model_id: String,
    conversation_script: Vec<ConversationStep>,
    delay: Duration,
    recorder: Arc<Mutex<Recorder>>,
}

impl Default for TestModelProvider {
    fn default() -> Self {
        Self {
            model_id: "test-model".to_owned(),
            conversation_script: vec![],
            delay: Duration::from_millis(1),
            recorder: Default::default(),
        }
    }
}

impl Debug for TestModelProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModelProvider")
            .field("model_id", &self.model_id)
            .field("steps", &self.conversation_script.len())
            .finish_non_exhaustive()
    }
}

impl TestModelProvider {
    /// Creates an empty script that reports `model_id` as its model.
    #[inline]
    pub fn with_model_id<S: Into<String>>(model_id: S) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    /// Adds a step for one tool result message. Add one per tool call the
    /// previous assistant step makes.
    #[inline]
    pub fn add_tool_result_step(&mut self) {
        self.conversation_script.push(ConversationStep::ToolResult);
    }

    /// Sets the delay before each event of a response.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = duration;
    }

    /// Returns every request sent to this provider (or its clones) so far,
    /// including the failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.recorder
            .lock()
            .map(|recorder| recorder.requests.clone())
            .unwrap_or_default()
    }

    fn respond(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        let step_idx = req.turn_count();
        let mut recorder = self.recorder.lock().map_err(|_| Error {
            message: "recorder poisoned",
            kind: ErrorKind::Other,
        })?;
        recorder.requests.push(req.clone());

        let preset = match self.conversation_script.get(step_idx) {
            None => {
                return Err(Error {
                    message: "no enough steps",
                    kind: ErrorKind::Other,
                });
            }
            Some(ConversationStep::UserInput | ConversationStep::ToolResult) => {
                return Err(Error {
                    message: "not an assistant response step",
                    kind: ErrorKind::Moderated,
                });
            }
            Some(ConversationStep::AssistantResponse(preset)) => preset,
        };

        let attempt = recorder.attempts.entry(step_idx).or_default();
        *attempt += 1;
        if preset.fails_on(*attempt) {
            return Err(Error {
                message: "scripted failure",
                kind: ErrorKind::RateLimitExceeded,
            });
        }

        Ok(TestModelResponse {
            preset: preset.clone(),
            step_idx,
            event_idx: 0,
            delay: self.delay,
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.respond(req))
    }
}
