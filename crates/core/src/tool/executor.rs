use std::collections::HashMap;
use std::future::ready;
use std::pin::Pin;

use fairweather_model::{ModelTool, ToolCallRequest, ToolCallResult};
use tracing::Instrument;

use crate::tool::{Error, ToolObject, ToolResult};

type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// An executor that handles tool call requests from the model.
pub struct Executor {
    // Registration order, which is also the order tools are declared to
    // the model.
    tools: Vec<Box<dyn ToolObject>>,
    index: HashMap<String, usize>,
}

impl Executor {
    /// Tool names are expected to be unique.
    pub fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(idx, tool)| (tool.name().to_owned(), idx))
            .collect();
        Self { tools, index }
    }

    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    fn start(&self, req: &ToolCallRequest) -> ToolFuture {
        let Some(&idx) = self.index.get(&req.name) else {
            warn!("tool not found: {}", req.name);
            let reason = format!(
                "{} is not a valid tool, try one of [{}].",
                req.name,
                self.tool_names().join(", ")
            );
            return Box::pin(ready(ToolResult::Err(
                Error::not_found().with_reason(reason),
            )));
        };
        trace!("spawning a tool ({}) with args: {:?}", req.id, req.arguments);
        self.tools[idx].execute(req.arguments.clone())
    }

    /// Runs all requested tools concurrently and returns their results in
    /// the order of `requests`.
    ///
    /// Failures never escape as errors, they are rendered into the result
    /// content so the model can react to them.
    pub async fn handle_requests(
        &self,
        requests: Vec<ToolCallRequest>,
    ) -> Vec<ToolCallResult> {
        let span = debug_span!("tool executor");

        let tasks: Vec<_> = span.in_scope(|| {
            requests
                .into_iter()
                .map(|req| {
                    let fut = self.start(&req).instrument(
                        debug_span!("tool execute", id = %req.id),
                    );
                    (req, tokio::spawn(fut))
                })
                .collect()
        });

        let mut results = Vec::with_capacity(tasks.len());
        for (req, task) in tasks {
            let result = task.await.unwrap_or_else(|err| {
                error!("tool task ({}) failed: {err}", req.id);
                Err(Error::execution_error().with_reason(err.to_string()))
            });
            if let Err(err) = &result {
                debug!("tool ({}) returned an error: {err}", req.id);
            }
            results.push(ToolCallResult {
                id: req.id,
                name: req.name,
                content: render_result(result),
            });
        }
        results
    }
}

fn render_result(result: ToolResult) -> String {
    match result {
        Ok(output) => output,
        Err(err) => format!("Error: {}", err.reason()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, LazyLock};
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{AnyTool, Tool};

    static ECHO_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "delay_ms": { "type": "integer" }
            },
            "required": ["text"]
        })
    });

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
        #[serde(default)]
        delay_ms: u64,
    }

    #[derive(Default)]
    struct EchoTool {
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the text"
        }

        fn parameter_schema(&self) -> &Value {
            &ECHO_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            let running = Arc::clone(&self.running);
            let max_running = Arc::clone(&self.max_running);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(input.delay_ms)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                if input.text.is_empty() {
                    return Err(Error::execution_error().with_reason("nothing to echo"));
                }
                Ok(input.text)
            }
        }
    }

    fn request(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[test]
    fn test_definitions() {
        let executor =
            Executor::with_tools(vec![Box::new(AnyTool(EchoTool::default()))]);
        let definitions = executor.definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "echo");
        assert_eq!(definitions[0].description, "Echoes the text");
        assert_eq!(definitions[0].parameters, *ECHO_SCHEMA);
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let tool = EchoTool::default();
        let max_running = Arc::clone(&tool.max_running);
        let executor = Executor::with_tools(vec![Box::new(AnyTool(tool))]);

        let results = executor
            .handle_requests(vec![
                request("call:1", "echo", json!({ "text": "slow", "delay_ms": 30 })),
                request("call:2", "echo", json!({ "text": "fast", "delay_ms": 1 })),
            ])
            .await;

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["call:1", "call:2"]);
        assert_eq!(results[0].content, "slow");
        assert_eq!(results[1].content, "fast");
        assert_eq!(max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_become_content() {
        let executor =
            Executor::with_tools(vec![Box::new(AnyTool(EchoTool::default()))]);

        let results = executor
            .handle_requests(vec![
                request("call:1", "read_file", json!({})),
                request("call:2", "echo", json!({ "txt": "typo" })),
                request("call:3", "echo", json!({ "text": "" })),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].name, "read_file");
        assert_eq!(
            results[0].content,
            "Error: read_file is not a valid tool, try one of [echo]."
        );
        assert!(results[1].content.starts_with("Error: missing field `text`"));
        assert_eq!(results[2].content, "Error: nothing to echo");
    }
}
