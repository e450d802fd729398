use fairweather_model::{ModelMessage, ModelRequest, ModelTool};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::GeminiConfig;

// -------------------------------------
// Types shared by requests and responses
// -------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Set on parts that carry the model's thought summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    /// Must be sent back unchanged with the part it came with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    #[inline]
    fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_thought(&self) -> bool {
        self.thought == Some(true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub response_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub status: Option<String>,
}

/// Returns `true` for finish reasons that mean the output was blocked.
#[inline]
pub fn is_blocking_finish_reason(reason: &str) -> bool {
    matches!(
        reason,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
    )
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclaration {
    name: String,
    description: String,
    // Accepts full JSON schema, unlike `parameters` which only takes the
    // OpenAPI subset and rejects keys like `$schema`.
    parameters_json_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

const ROLE_USER: &str = "user";
const ROLE_MODEL: &str = "model";

// -----------
// Conversions
// -----------

pub fn create_request(
    req: &ModelRequest,
    config: &GeminiConfig,
) -> GenerateContentRequest {
    let mut system_parts = vec![];
    let mut contents: Vec<Content> = vec![];

    for msg in &req.messages {
        let (role, part) = match msg {
            ModelMessage::System(text) => {
                system_parts.push(Part::text(text.as_str()));
                continue;
            }
            ModelMessage::User(text) => (ROLE_USER, Part::text(text.as_str())),
            ModelMessage::Assistant(text) => {
                if text.is_empty() {
                    continue;
                }
                (ROLE_MODEL, Part::text(text.as_str()))
            }
            ModelMessage::Tool(result) => (
                ROLE_USER,
                Part {
                    function_response: Some(FunctionResponse {
                        name: result.name.clone(),
                        response: json!({ "result": result.content }),
                    }),
                    ..Default::default()
                },
            ),
            ModelMessage::Opaque(opaque) => {
                // Opaque messages from this provider always hold `Content`.
                let Some(content) = opaque.to_raw::<Content>() else {
                    warn!("skipping a history message from another provider");
                    continue;
                };
                contents.push(content.clone());
                continue;
            }
        };

        // All responses to one model turn go into a single content, the API
        // pairs them with the function calls of that turn.
        let is_function_response = part.function_response.is_some();
        match contents.last_mut() {
            Some(last)
                if is_function_response
                    && last.role.as_deref() == Some(ROLE_USER)
                    && last.parts.iter().all(|p| p.function_response.is_some()) =>
            {
                last.parts.push(part);
            }
            _ => contents.push(Content {
                role: Some(role.to_owned()),
                parts: vec![part],
            }),
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: system_parts,
        })
    };

    let tools = if req.tools.is_empty() {
        vec![]
    } else {
        vec![Tool {
            function_declarations: req.tools.iter().map(create_tool).collect(),
        }]
    };

    let generation_config =
        if config.temperature.is_none() && config.max_output_tokens.is_none() {
            None
        } else {
            Some(GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            })
        };

    GenerateContentRequest {
        system_instruction,
        contents,
        tools,
        generation_config,
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters_json_schema: tool.parameters.clone(),
    }
}
