use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient};
use crate::tools::ToolRegistry;

const EVENT_BUFFER: usize = 32;

pub const CONSULTING_INSTRUCTIONS: &str = "\
You are a consulting assistant supporting a team through an engagement with a client.
Every message may start with a [SYSTEM CONTEXT] block describing the active opportunity;
treat it as ground truth and never repeat it back verbatim.

- When the user asks for an action, call the matching tool instead of describing it.
- Capture tasks, risks, deliverables, process notes and insights as they come up.
- After a tool runs, confirm the outcome in one or two sentences and suggest a next step.
- Only use information from the context block, the conversation or tool results.";

#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    ToolCalled { name: String, arguments: Value, output: Value },
    ClientToolCall { name: String, arguments: Value },
    AssistantMessage { text: String },
    Error { message: String },
    Done,
}

pub trait AgentRuntime: Send + Sync {
    /// Starts a run in the background; the receiver always ends with [`AgentEvent::Done`]
    /// unless it is dropped first.
    fn run_streamed(&self, prompt: String) -> mpsc::Receiver<AgentEvent>;
}

/// Alternates model completions and tool executions until the model answers
/// in text or `max_turns` completions have been spent.
#[derive(Clone)]
pub struct ToolLoopAgent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    max_turns: u32,
}

impl ToolLoopAgent {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, max_turns: u32) -> Self {
        Self { llm, tools, max_turns: max_turns.max(1) }
    }

    async fn run(self, prompt: String, events: mpsc::Sender<AgentEvent>) {
        let mut messages = vec![ChatMessage::system(CONSULTING_INSTRUCTIONS), ChatMessage::user(prompt)];
        let specs = self.tools.specs();

        for turn in 0..self.max_turns {
            let request = CompletionRequest {
                messages: messages.clone(),
                tools: specs.clone(),
                ..CompletionRequest::default()
            };

            let calls = match self.llm.complete(request).await {
                Ok(Completion::Message(text)) => {
                    let _ = events.send(AgentEvent::AssistantMessage { text }).await;
                    let _ = events.send(AgentEvent::Done).await;
                    return;
                }
                Ok(Completion::ToolCalls(calls)) => calls,
                Err(error) => {
                    tracing::error!(event_name = "agent.completion.failed", turn, error = %error, "agent run failed");
                    let _ = events.send(AgentEvent::Error { message: error.to_string() }).await;
                    let _ = events.send(AgentEvent::Done).await;
                    return;
                }
            };

            messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
            for call in calls {
                tracing::info!(event_name = "agent.tool.called", turn, tool = %call.name, "executing tool");
                let outcome = self.tools.execute(&call.name, call.arguments.clone()).await;

                let called = AgentEvent::ToolCalled {
                    name: call.name.clone(),
                    arguments: call.arguments,
                    output: outcome.output.clone(),
                };
                if events.send(called).await.is_err() {
                    return;
                }
                if let Some(client_call) = outcome.client_call {
                    let event = AgentEvent::ClientToolCall {
                        name: client_call.name,
                        arguments: client_call.arguments,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }

                messages.push(ChatMessage::tool_result(call.id, outcome.output.to_string()));
            }
        }

        tracing::warn!(event_name = "agent.turns.exhausted", max_turns = self.max_turns, "agent stopped");
        let message = format!("Stopped after {} tool rounds without a final answer", self.max_turns);
        let _ = events.send(AgentEvent::Error { message }).await;
        let _ = events.send(AgentEvent::Done).await;
    }
}

impl AgentRuntime for ToolLoopAgent {
    fn run_streamed(&self, prompt: String) -> mpsc::Receiver<AgentEvent> {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(self.clone().run(prompt, sender));
        receiver
    }
}
