//! Asks the weather assistant one question from the command line.
//!
//! Without a question, the agent is assembled and the program exits.

#[macro_use]
extern crate tracing;

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use fairweather::core::{AgentError, TranscriptSource};
use fairweather::{DEFAULT_MODEL, assemble_agent, resolve_system_prompt};
use fairweather_gemini_model::{GeminiConfigBuilder, GeminiProvider};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum AgentEvent {
    Idle,
    Transcript(String, TranscriptSource),
    Error(AgentError),
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(api_key) = env::var("GOOGLE_API_KEY") else {
        eprintln!("GOOGLE_API_KEY environment variable is not set");
        return ExitCode::FAILURE;
    };
    let model =
        env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
    let mut config =
        GeminiConfigBuilder::with_api_key(api_key).with_model(model);
    if let Ok(base_url) = env::var("GEMINI_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    let model_provider = GeminiProvider::new(config.build());

    let system_prompt =
        resolve_system_prompt(env::var("FAIRWEATHER_SYSTEM_PROMPT").ok());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let agent = assemble_agent(model_provider, system_prompt.as_deref())
        .on_idle({
            let event_tx = event_tx.clone();
            move || {
                event_tx.send(AgentEvent::Idle).ok();
            }
        })
        .on_transcript({
            let event_tx = event_tx.clone();
            move |transcript, source| {
                event_tx
                    .send(AgentEvent::Transcript(transcript.to_owned(), source))
                    .ok();
            }
        })
        .on_error({
            let event_tx = event_tx.clone();
            move |err| {
                event_tx.send(AgentEvent::Error(err.clone())).ok();
            }
        })
        .build();
    drop(event_tx);
    info!("agent ready, using {}", agent.model_id());

    let question = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        agent.try_kill();
        return ExitCode::SUCCESS;
    }
    if agent.enqueue_user_input(question.trim()).is_err() {
        eprintln!("the agent stopped before taking the question");
        return ExitCode::FAILURE;
    }

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut progress_bar = None;
    let mut exit_code = ExitCode::SUCCESS;

    loop {
        // Create a new progress bar if it has been finished.
        progress_bar
            .get_or_insert_with(|| {
                let progress_bar = ProgressBar::new_spinner();
                progress_bar.set_style(progress_style.clone());
                progress_bar.set_message("🤔 Thinking...");
                progress_bar
            })
            .inc(1);

        let sleep = sleep(Duration::from_millis(100));
        let event = select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                event
            },
            _ = sleep => {
                continue;
            }
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = &progress_bar {
            progress_bar.finish_and_clear();
        }
        progress_bar = None;

        match event {
            AgentEvent::Transcript(transcript, source) => {
                if source == TranscriptSource::Assistant {
                    println!(
                        "{}🤖 {}",
                        BAR_CHAR.bright_cyan(),
                        transcript.bright_white()
                    );
                }
            }
            AgentEvent::Error(err) => {
                eprintln!("{}⚠️  {}", BAR_CHAR.bright_red(), err);
                exit_code = ExitCode::FAILURE;
            }
            AgentEvent::Idle => {
                break;
            }
        }
    }

    agent.try_kill();
    exit_code
}
