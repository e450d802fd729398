use std::sync::{Arc, Mutex};
use std::time::Duration;

use fairweather::core::TranscriptSource;
use fairweather::{DEFAULT_SYSTEM_PROMPT, assemble_agent};
use fairweather_model::{ModelMessage, ToolCallRequest};
use fairweather_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;

fn weather_script(city: &str) -> TestModelProvider {
    let mut model_provider = TestModelProvider::with_model_id("gemini-2.5-pro");
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::ToolCall(ToolCallRequest {
            id: "call:1".to_owned(),
            name: "get_weather".to_owned(),
            arguments: json!({ "city": city }),
        }),
    ]));
    model_provider.add_tool_result_step();
    model_provider.add_assistant_response_step(PresetResponse::with_text(
        format!("The forecast says it's always sunny in {city}."),
    ));
    model_provider
}

async fn ask(
    model_provider: TestModelProvider,
    system_prompt: Option<&str>,
    question: &str,
) -> Vec<(String, TranscriptSource)> {
    let (idle_tx, mut idle_rx) = watch::channel(false);
    let transcripts = Arc::new(Mutex::new(vec![]));

    let agent = assemble_agent(model_provider, system_prompt)
        .on_idle(move || {
            idle_tx.send(true).ok();
        })
        .on_transcript({
            let transcripts = Arc::clone(&transcripts);
            move |text: &str, source| {
                transcripts.lock().unwrap().push((text.to_owned(), source));
            }
        })
        .build();
    agent.enqueue_user_input(question).unwrap();

    timeout(Duration::from_secs(1), idle_rx.wait_for(|v| *v))
        .await
        .unwrap()
        .unwrap();
    transcripts.lock().unwrap().clone()
}

#[tokio::test]
async fn test_weather_question() {
    let model_provider = weather_script("São Paulo");
    let transcripts = ask(
        model_provider.clone(),
        Some(DEFAULT_SYSTEM_PROMPT),
        "How is the weather in São Paulo?",
    )
    .await;

    assert_eq!(
        transcripts,
        [
            (
                "How is the weather in São Paulo?".to_owned(),
                TranscriptSource::User
            ),
            (
                "It's always sunny in São Paulo!".to_owned(),
                TranscriptSource::Tool
            ),
            (
                "The forecast says it's always sunny in São Paulo.".to_owned(),
                TranscriptSource::Assistant
            ),
        ]
    );

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].messages[0],
        ModelMessage::System("You are a helpful assistant".to_owned())
    );
    assert_eq!(requests[0].tools[0].name, "get_weather");
    assert_eq!(
        requests[0].tools[0].description,
        "Get weather for a given city."
    );
    let ModelMessage::Tool(result) = requests[1].messages.last().unwrap() else {
        panic!("the last message should be the tool result");
    };
    assert_eq!(result.id, "call:1");
    assert_eq!(result.name, "get_weather");
    assert_eq!(result.content, "It's always sunny in São Paulo!");
}

#[tokio::test]
async fn test_without_system_prompt() {
    let model_provider = weather_script("Paris");
    ask(model_provider.clone(), None, "Paris?").await;

    for req in model_provider.requests() {
        assert!(
            !req.messages
                .iter()
                .any(|msg| matches!(msg, ModelMessage::System(_)))
        );
    }
}

#[tokio::test]
async fn test_bad_arguments_reach_the_model() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::ToolCall(ToolCallRequest {
            id: "call:1".to_owned(),
            name: "get_weather".to_owned(),
            arguments: json!({ "town": "Paris" }),
        }),
    ]));
    model_provider.add_tool_result_step();
    model_provider.add_assistant_response_step(PresetResponse::with_text(
        "Which city?",
    ));

    let transcripts = ask(model_provider, None, "Weather?").await;
    let (tool_output, source) = &transcripts[1];
    assert_eq!(*source, TranscriptSource::Tool);
    assert!(tool_output.starts_with("Error: missing field `city`"));
    assert_eq!(transcripts[2].0, "Which city?");
}
