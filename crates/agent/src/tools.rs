use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use consultai_core::errors::DomainError;
use consultai_db::repositories::RepositoryError;

use crate::llm::{LlmError, ToolSpec};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),
    #[error("No active opportunity")]
    NoActiveOpportunity,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage failure: {0}")]
    Repository(#[from] RepositoryError),
    #[error("language model failure: {0}")]
    Llm(#[from] LlmError),
}

/// An instruction for the frontend, e.g. `switch_theme {"theme": "dark"}`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub output: Value,
    pub client_call: Option<ClientToolCall>,
}

impl ToolOutcome {
    pub fn output(output: Value) -> Self {
        Self { output, client_call: None }
    }

    pub fn with_client_call(mut self, name: &str, arguments: Value) -> Self {
        self.client_call = Some(ClientToolCall { name: name.to_string(), arguments });
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::output(json!({ "error": message.into() }))
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Runs a tool by name. Failures come back as `{"error": ...}` outputs so
    /// the model can read them.
    pub async fn execute(&self, name: &str, input: Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(event_name = "agent.tool.unknown", tool = name, "model requested unknown tool");
            return ToolOutcome::error(format!("Unknown tool: {name}"));
        };

        match tool.execute(input).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.tool.failed",
                    tool = name,
                    error = %error,
                    "tool execution failed"
                );
                ToolOutcome::error(error.to_string())
            }
        }
    }
}

pub(crate) fn required_str<'a>(input: &'a Value, key: &'static str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ToolError::MissingArgument(key))
}

/// Missing, null and blank values all read as `None`.
pub(crate) fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

pub(crate) fn str_or<'a>(input: &'a Value, key: &str, default: &'a str) -> &'a str {
    optional_str(input, key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{required_str, Tool, ToolError, ToolOutcome, ToolRegistry};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo the text argument"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }

        async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
            let text = required_str(&input, "text")?;
            Ok(ToolOutcome::output(json!({ "text": text })))
        }
    }

    #[tokio::test]
    async fn registry_runs_tools_and_reports_failures_as_output() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs()[0].name, "echo");

        let ok = registry.execute("echo", json!({ "text": "hi" })).await;
        assert_eq!(ok.output, json!({ "text": "hi" }));

        let missing = registry.execute("echo", json!({})).await;
        assert_eq!(missing.output, json!({ "error": "missing required argument `text`" }));

        let unknown = registry.execute("nope", json!({})).await;
        assert_eq!(unknown.output, json!({ "error": "Unknown tool: nope" }));
    }
}
