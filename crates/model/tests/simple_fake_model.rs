use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::{Pin, pin};
use std::task::{self, Poll};

use fairweather_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    ModelResponseExt, ToolCallRequest,
};
use serde_json::json;

#[derive(Debug)]
struct FakeError(ErrorKind);

impl Display for FakeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fake model failed: {}", self.0)
    }
}

impl Error for FakeError {}

impl ModelProviderError for FakeError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Asks for the weather tool on the first turn, then repeats the tool
/// result back word by word.
struct FakeResponse {
    events: VecDeque<ModelResponseEvent>,
}

impl ModelResponse for FakeResponse {
    type Error = FakeError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        Poll::Ready(Ok(self.get_mut().events.pop_front()))
    }
}

struct FakeProvider;

impl ModelProvider for FakeProvider {
    type Error = FakeError;
    type Response = FakeResponse;

    fn model_id(&self) -> &str {
        "fake-weather"
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let events = match req.messages.last() {
            Some(ModelMessage::User(city)) => vec![
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call:0".to_owned(),
                    name: "get_weather".to_owned(),
                    arguments: json!({ "city": city }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ],
            Some(ModelMessage::Tool(result)) => {
                let mut events: Vec<_> = result
                    .content
                    .split_inclusive(' ')
                    .map(|word| ModelResponseEvent::MessageDelta(word.to_owned()))
                    .collect();
                events.push(ModelResponseEvent::Completed(
                    ModelFinishReason::Stop,
                ));
                events
            }
            _ => return ready(Err(FakeError(ErrorKind::Other))),
        };
        ready(Ok(FakeResponse {
            events: events.into(),
        }))
    }
}

async fn drain(resp: FakeResponse) -> Vec<ModelResponseEvent> {
    let mut resp = pin!(resp);
    let mut events = vec![];
    while let Some(event) = resp.as_mut().next_event().await.unwrap() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_tool_call_round() {
    let provider = FakeProvider;
    assert_eq!(provider.model_id(), "fake-weather");

    let mut req = ModelRequest {
        messages: vec![ModelMessage::User("Paris".to_owned())],
        tools: vec![],
    };
    let events = drain(provider.send_request(&req).await.unwrap()).await;
    let Some(ModelResponseEvent::ToolCall(call)) = events.first() else {
        panic!("expected a tool call, got {events:?}");
    };
    assert_eq!(call.arguments, json!({ "city": "Paris" }));
    assert_eq!(
        events.last(),
        Some(&ModelResponseEvent::Completed(ModelFinishReason::ToolCalls))
    );

    req.messages.push(ModelMessage::Tool(fairweather_model::ToolCallResult {
        id: call.id.clone(),
        name: call.name.clone(),
        content: "It's always sunny in Paris!".to_owned(),
    }));
    let events = drain(provider.send_request(&req).await.unwrap()).await;
    let text: String = events
        .iter()
        .filter_map(|event| match event {
            ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "It's always sunny in Paris!");
}

#[tokio::test]
async fn test_error() {
    let provider = FakeProvider;
    let err = provider
        .send_request(&ModelRequest::default())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(!err.kind().is_transient());
}
