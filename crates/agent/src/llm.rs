//! Chat-completion client seam.
//!
//! The agent only ever talks to an [`LlmClient`]. [`OpenAiCompatibleClient`]
//! speaks the OpenAI chat-completions JSON, which both the hosted API and a
//! local Ollama server (`/v1`) accept.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use consultai_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: None, tool_calls, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A function call requested by the model. `arguments` is already parsed JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    Message(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm endpoint returned HTTP {status}: {body}")]
    Server { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm response contained no choices")]
    EmptyResponse,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client =
            Client::builder().timeout(Duration::from_secs(config.timeout_secs.max(1))).build()?;
        let base_url = match (&config.base_url, config.provider) {
            (Some(base_url), _) => base_url.clone(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        };

        Ok(Self { client, base_url, api_key: config.api_key.clone(), model: config.model.clone() })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let body = wire_request(&request, &self.model);

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                event_name = "llm.completion.failed",
                status = status.as_u16(),
                "chat completion endpoint returned an error"
            );
            return Err(LlmError::Server { status: status.as_u16(), body });
        }

        let payload: WireResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        completion_from_wire(payload)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

fn wire_request(request: &CompletionRequest, default_model: &str) -> WireRequest {
    WireRequest {
        model: request.model.clone().unwrap_or_else(|| default_model.to_string()),
        messages: request
            .messages
            .iter()
            .map(|message| WireMessage {
                role: message.role,
                content: message.content.clone(),
                tool_calls: message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        call_type: function_type(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: message.tool_call_id.clone(),
            })
            .collect(),
        tools: request
            .tools
            .iter()
            .map(|tool| WireTool {
                tool_type: "function",
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

fn completion_from_wire(response: WireResponse) -> Result<Completion, LlmError> {
    let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
    let message = choice.message;

    if !message.tool_calls.is_empty() {
        let calls = message
            .tool_calls
            .into_iter()
            .map(|call| {
                let raw = call.function.arguments;
                let arguments = if raw.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&raw).map_err(|error| {
                        LlmError::Decode(format!(
                            "arguments for `{}` are not valid json: {error}",
                            call.function.name
                        ))
                    })?
                };
                Ok(ToolCall { id: call.id, name: call.function.name, arguments })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;
        return Ok(Completion::ToolCalls(calls));
    }

    Ok(Completion::Message(message.content.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        completion_from_wire, wire_request, ChatMessage, Completion, CompletionRequest, LlmError,
        ToolCall, ToolSpec, WireResponse,
    };

    #[test]
    fn request_encodes_tool_calls_and_function_specs() {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::user("create a task"),
                ChatMessage::assistant_tool_calls(vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "create_task".to_string(),
                    arguments: json!({ "title": "Draft SOW" }),
                }]),
                ChatMessage::tool_result("call_1", r#"{"task_id":"task_1"}"#),
            ],
            tools: vec![ToolSpec {
                name: "create_task".to_string(),
                description: "Create a task".to_string(),
                parameters: json!({ "type": "object" }),
            }],
            ..CompletionRequest::default()
        };

        let body = serde_json::to_value(wire_request(&request, "llama3.1")).expect("encode");

        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["tool_calls"][0]["type"], "function");
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            r#"{"title":"Draft SOW"}"#
        );
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "create_task");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn response_with_tool_calls_parses_arguments() {
        let response: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "switch_theme", "arguments": "{\"theme\":\"dark\"}" }
                    }]
                }
            }]
        }))
        .expect("decode");

        let completion = completion_from_wire(response).expect("completion");
        assert_eq!(
            completion,
            Completion::ToolCalls(vec![ToolCall {
                id: "call_9".to_string(),
                name: "switch_theme".to_string(),
                arguments: json!({ "theme": "dark" }),
            }])
        );
    }

    #[test]
    fn response_with_text_and_empty_choices() {
        let text: WireResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello" } }]
        }))
        .expect("decode");
        assert_eq!(completion_from_wire(text).expect("completion"), Completion::Message("Hello".to_string()));

        let empty: WireResponse = serde_json::from_value(json!({ "choices": [] })).expect("decode");
        assert!(matches!(completion_from_wire(empty), Err(LlmError::EmptyResponse)));
    }
}
