//! Consulting agent runtime.
//!
//! This crate turns a chat message into work on the engagement stores:
//! - `llm` is the seam to an OpenAI-compatible chat-completions endpoint
//! - `tools` and `toolkit` define the function tools the model may call
//! - `context` renders the active opportunity into the prompt
//! - `runtime` runs the completion/tool loop as a stream of events
//! - `conversation` persists chat threads and drives one turn per user message
//!
//! The model never writes to storage directly; every change goes through a tool.

pub mod context;
pub mod conversation;
pub mod llm;
pub mod runtime;
pub mod toolkit;
pub mod tools;

pub use conversation::{ChatError, ChatResult, ChatServer, RequestContext, StreamEvent, TitleGenerator};
pub use llm::{LlmClient, LlmError, OpenAiCompatibleClient};
pub use runtime::{AgentEvent, AgentRuntime, ToolLoopAgent};
pub use toolkit::{consulting_registry, ToolContext};
