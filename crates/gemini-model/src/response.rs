use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use fairweather_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage, ToolCallRequest,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::{self, Content, GenerateContentResponse, Part};

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Ids for responses and calls the server left unnamed.
fn local_id(prefix: &str) -> String {
    let n = NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}:{n}")
}

struct PartialState {
    sse: Sse,
    id: Option<String>,
    parts: Vec<Part>,
    // Events decoded from the stream but not yet handed out. One chunk may
    // carry several parts, each becoming its own event.
    pending_events: VecDeque<ModelResponseEvent>,
    has_tool_call: bool,
    stream_ended: bool,
    completed: bool,
}

impl PartialState {
    fn finish(self) -> Option<(String, Content)> {
        if self.parts.is_empty() {
            return None;
        }
        Some((
            self.id.unwrap_or_else(|| local_id("gemini-response")),
            Content {
                role: Some("model".to_owned()),
                parts: self.parts,
            },
        ))
    }

    fn apply_chunk(&mut self, chunk: GenerateContentResponse) -> Result<(), Error> {
        if let Some(reason) = chunk
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(Error::new(
                format!("prompt blocked: {reason}"),
                ErrorKind::Moderated,
            ));
        }
        if self.id.is_none() {
            self.id = chunk.response_id;
        }

        // Only one candidate is ever requested.
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return Ok(());
        };

        for part in candidate.content.into_iter().flat_map(|c| c.parts) {
            self.apply_part(part);
        }

        if let Some(reason) = candidate.finish_reason {
            if proto::is_blocking_finish_reason(&reason) {
                return Err(Error::new(
                    format!("response blocked: {reason}"),
                    ErrorKind::Moderated,
                ));
            }
            trace!("finish reason: {reason}");
        }
        Ok(())
    }

    fn apply_part(&mut self, part: Part) {
        if let Some(call) = &part.function_call {
            self.has_tool_call = true;
            let id = call.id.clone().unwrap_or_else(|| local_id("call"));
            self.pending_events.push_back(ModelResponseEvent::ToolCall(
                ToolCallRequest {
                    id,
                    name: call.name.clone(),
                    arguments: call.args.clone(),
                },
            ));
            self.parts.push(part);
            return;
        }

        let plain_text = part
            .text
            .as_ref()
            .filter(|text| !part.is_thought() && !text.is_empty());
        if let Some(text) = plain_text {
            self.pending_events
                .push_back(ModelResponseEvent::MessageDelta(text.clone()));

            // Streamed text arrives in many small parts, keep one part per
            // run of plain text in the history.
            let last_text = self
                .parts
                .last_mut()
                .filter(|last| {
                    part.thought_signature.is_none()
                        && last.thought_signature.is_none()
                        && last.function_call.is_none()
                        && !last.is_thought()
                })
                .and_then(|last| last.text.as_mut());
            if let Some(last_text) = last_text {
                last_text.push_str(text);
                return;
            }
        }
        self.parts.push(part);
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed `streamGenerateContent` response.
    pub struct GeminiResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        full_msg: Option<(String, Content)>,
    }
}

impl GeminiResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            parts: Default::default(),
            pending_events: Default::default(),
            has_tool_call: false,
            stream_ended: false,
            completed: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
            full_msg: None,
        }
    }
}

impl ModelResponse for GeminiResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.full_msg = partial_state.finish();
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.full_msg
            .as_ref()
            .map(|(id, content)| OpaqueMessage::new(id, content.clone()))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }

        if partial_state.stream_ended {
            if partial_state.completed {
                return Ok((None, partial_state));
            }
            partial_state.completed = true;
            let reason = if partial_state.has_tool_call {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            };
            return Ok((
                Some(ModelResponseEvent::Completed(reason)),
                partial_state,
            ));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.stream_ended = true;
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");

        let chunk = serde_json::from_str::<GenerateContentResponse>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        partial_state.apply_chunk(chunk)?;
    }
}
