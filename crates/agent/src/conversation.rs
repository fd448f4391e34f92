//! Chat thread protocol: `{"type": ..., "params": ...}` requests over
//! persisted threads, with user messages answered as an event stream.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use consultai_core::domain::opportunity::Opportunity;
use consultai_core::domain::thread::{ChatThread, PageRequest, SortOrder, ThreadId, ThreadItem};
use consultai_db::repositories::{OpportunityRepository, RepositoryError, ThreadRepository};

use crate::context::with_opportunity_context;
use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient};
use crate::runtime::{AgentEvent, AgentRuntime};

const STREAM_BUFFER: usize = 32;
const MAX_PAGE_LIMIT: usize = 100;
const TITLE_MAX_CHARS: usize = 50;
/// Threads with at most this many items after the user message get a generated title.
const TITLE_ITEM_THRESHOLD: usize = 2;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown request type `{0}`")]
    UnknownRequest(String),
    #[error("thread `{0}` not found")]
    ThreadNotFound(String),
    #[error("storage failure: {0}")]
    Repository(#[from] RepositoryError),
    #[error("response encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "thread.created")]
    ThreadCreated { thread: ChatThread },
    #[serde(rename = "thread.updated")]
    ThreadUpdated { thread: ChatThread },
    #[serde(rename = "thread.item.added")]
    ItemAdded { item: ThreadItem },
    #[serde(rename = "thread.item.done")]
    ItemDone { item: ThreadItem },
    #[serde(rename = "progress_update")]
    Progress { text: String },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug)]
pub enum ChatResult {
    Json(Value),
    Stream(mpsc::Receiver<StreamEvent>),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct UserInput {
    #[serde(default)]
    content: Vec<InputContent>,
}

#[derive(Deserialize)]
struct InputContent {
    #[serde(default)]
    text: Option<String>,
}

impl UserInput {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Deserialize)]
struct CreateThreadParams {
    input: UserInput,
}

#[derive(Deserialize)]
struct AddMessageParams {
    thread_id: String,
    input: UserInput,
}

#[derive(Deserialize)]
struct ThreadParams {
    thread_id: String,
}

#[derive(Deserialize)]
struct UpdateThreadParams {
    thread_id: String,
    title: String,
}

#[derive(Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    order: Option<SortOrder>,
}

impl ListParams {
    fn page(self, default_order: SortOrder) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest {
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_LIMIT),
            after: self.after,
            order: self.order.unwrap_or(default_order),
        }
    }
}

#[derive(Deserialize)]
struct ItemsParams {
    thread_id: String,
    #[serde(flatten)]
    page: ListParams,
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, ChatError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|error| ChatError::InvalidRequest(error.to_string()))
}

/// Produces short thread titles from the first user message.
#[derive(Clone)]
pub struct TitleGenerator {
    llm: Arc<dyn LlmClient>,
    model: Option<String>,
}

impl TitleGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, model: Option<String>) -> Self {
        Self { llm, model }
    }

    pub async fn generate(&self, first_message: &str, client_name: Option<&str>) -> String {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(title_prompt(first_message, client_name))],
            tools: Vec::new(),
            model: self.model.clone(),
            max_tokens: Some(20),
            temperature: Some(0.7),
        };

        match self.llm.complete(request).await {
            Ok(Completion::Message(text)) => {
                let title = clean_title(&text);
                if !title.is_empty() {
                    return title;
                }
            }
            Ok(Completion::ToolCalls(_)) => {}
            Err(error) => {
                tracing::warn!(event_name = "chat.title.failed", error = %error, "title generation failed");
            }
        }

        fallback_title(client_name)
    }
}

fn title_prompt(first_message: &str, client_name: Option<&str>) -> String {
    let excerpt = first_message.chars().take(200).collect::<String>();
    format!(
        "Generate a short, descriptive title (max 50 characters) for this conversation.\n\n\
         Opportunity: {}\n\
         First message: {excerpt}\n\n\
         Title should be:\n\
         - Specific to the topic discussed\n\
         - Include client/opportunity name if relevant\n\
         - Professional and concise\n\
         - No quotes or special formatting\n\n\
         Examples:\n\
         - \"Acme Corp - Discovery Pain Points\"\n\
         - \"Beta Inc - Meeting Prep for CTO\"\n\
         - \"Supply Chain - Risk Analysis\"\n\n\
         Generate only the title, nothing else:",
        client_name.unwrap_or("General")
    )
}

fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches('"').trim_matches('\'').chars().take(TITLE_MAX_CHARS).collect()
}

fn fallback_title(client_name: Option<&str>) -> String {
    match client_name {
        Some(client) => format!("{client} - Discussion"),
        None => "New Discussion".to_string(),
    }
}

#[derive(Clone)]
pub struct ChatServer {
    threads: Arc<dyn ThreadRepository>,
    opportunities: Arc<dyn OpportunityRepository>,
    agent: Arc<dyn AgentRuntime>,
    titles: TitleGenerator,
}

impl ChatServer {
    pub fn new(
        threads: Arc<dyn ThreadRepository>,
        opportunities: Arc<dyn OpportunityRepository>,
        agent: Arc<dyn AgentRuntime>,
        titles: TitleGenerator,
    ) -> Self {
        Self { threads, opportunities, agent, titles }
    }

    pub async fn process(
        &self,
        payload: &[u8],
        context: RequestContext,
    ) -> Result<ChatResult, ChatError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|error| ChatError::InvalidRequest(error.to_string()))?;

        tracing::info!(
            event_name = "chat.request.received",
            correlation_id = %context.correlation_id,
            user_id = context.user_id.as_deref().unwrap_or("anonymous"),
            request_type = %envelope.kind,
            "chat request received"
        );

        match envelope.kind.as_str() {
            "threads.create" => {
                let params: CreateThreadParams = parse_params(envelope.params)?;
                self.create_thread(params.input.text()).await
            }
            "threads.add_user_message" => {
                let params: AddMessageParams = parse_params(envelope.params)?;
                let thread = self.require_thread(&params.thread_id).await?;
                self.respond(thread, params.input.text(), None).await
            }
            "threads.get_by_id" => {
                let params: ThreadParams = parse_params(envelope.params)?;
                let thread = self.require_thread(&params.thread_id).await?;
                let items = self.threads.list_items(&thread.id, &PageRequest::default()).await?;
                let mut body = serde_json::to_value(&thread)?;
                body["items"] = serde_json::to_value(items)?;
                Ok(ChatResult::Json(body))
            }
            "threads.list" => {
                let params: ListParams = parse_params(envelope.params)?;
                let page = self.threads.list_threads(&params.page(SortOrder::Desc)).await?;
                Ok(ChatResult::Json(serde_json::to_value(page)?))
            }
            "threads.update" => {
                let params: UpdateThreadParams = parse_params(envelope.params)?;
                let mut thread = self.require_thread(&params.thread_id).await?;
                thread.title = Some(params.title.trim().to_string());
                let active = self.active_opportunity().await;
                self.save_thread(&mut thread, active.as_ref()).await?;
                Ok(ChatResult::Json(serde_json::to_value(thread)?))
            }
            "threads.delete" => {
                let params: ThreadParams = parse_params(envelope.params)?;
                if !self.threads.delete_thread(&ThreadId(params.thread_id.clone())).await? {
                    return Err(ChatError::ThreadNotFound(params.thread_id));
                }
                Ok(ChatResult::Json(json!({ "id": params.thread_id, "deleted": true })))
            }
            "items.list" => {
                let params: ItemsParams = parse_params(envelope.params)?;
                let thread = self.require_thread(&params.thread_id).await?;
                let page =
                    self.threads.list_items(&thread.id, &params.page.page(SortOrder::Asc)).await?;
                Ok(ChatResult::Json(serde_json::to_value(page)?))
            }
            other => Err(ChatError::UnknownRequest(other.to_string())),
        }
    }

    async fn require_thread(&self, id: &str) -> Result<ChatThread, ChatError> {
        self.threads
            .load_thread(&ThreadId(id.to_string()))
            .await?
            .ok_or_else(|| ChatError::ThreadNotFound(id.to_string()))
    }

    /// Lookup failures only cost the context block, so they are logged and skipped.
    async fn active_opportunity(&self) -> Option<Opportunity> {
        match self.opportunities.get_active().await {
            Ok(active) => active,
            Err(error) => {
                tracing::warn!(
                    event_name = "chat.context.unavailable",
                    error = %error,
                    "active opportunity lookup failed"
                );
                None
            }
        }
    }

    async fn save_thread(
        &self,
        thread: &mut ChatThread,
        active: Option<&Opportunity>,
    ) -> Result<(), RepositoryError> {
        thread.opportunity_id = active.map(|opportunity| opportunity.id.clone());
        thread.updated_at = Utc::now();
        self.threads.save_thread(thread).await
    }

    async fn create_thread(&self, text: String) -> Result<ChatResult, ChatError> {
        if text.is_empty() {
            return Err(ChatError::InvalidRequest("user message has no text".to_string()));
        }

        let mut thread = ChatThread::new(None);
        let active = self.active_opportunity().await;
        self.save_thread(&mut thread, active.as_ref()).await?;
        tracing::info!(event_name = "chat.thread.created", thread_id = %thread.id.0, "thread created");

        let created = StreamEvent::ThreadCreated { thread: thread.clone() };
        self.respond(thread, text, Some(created)).await
    }

    async fn respond(
        &self,
        thread: ChatThread,
        text: String,
        first: Option<StreamEvent>,
    ) -> Result<ChatResult, ChatError> {
        if text.is_empty() {
            return Err(ChatError::InvalidRequest("user message has no text".to_string()));
        }

        let user_item = ThreadItem::user_message(&thread.id, &text);
        self.threads.add_item(&user_item).await?;
        let needs_title =
            self.threads.count_items(&thread.id).await? <= TITLE_ITEM_THRESHOLD;

        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        if let Some(first) = first {
            let _ = sender.send(first).await;
        }
        let _ = sender.send(StreamEvent::ItemAdded { item: user_item }).await;

        tokio::spawn(self.clone().run_turn(thread, text, needs_title, sender));
        Ok(ChatResult::Stream(receiver))
    }

    /// Persists agent output as it arrives. The client may disconnect; the turn still completes.
    async fn run_turn(
        self,
        mut thread: ChatThread,
        text: String,
        needs_title: bool,
        sender: mpsc::Sender<StreamEvent>,
    ) {
        let active = self.active_opportunity().await;
        let prompt = with_opportunity_context(active.as_ref(), &text);
        let mut events = self.agent.run_streamed(prompt);

        while let Some(event) = events.recv().await {
            let outgoing = match event {
                AgentEvent::ToolCalled { name, .. } => StreamEvent::Progress { text: format!("Ran {name}") },
                AgentEvent::ClientToolCall { name, arguments } => {
                    self.persist(ThreadItem::client_tool_call(&thread.id, &name, arguments)).await
                }
                AgentEvent::AssistantMessage { text } => {
                    self.persist(ThreadItem::assistant_message(&thread.id, &text)).await
                }
                AgentEvent::Error { message } => StreamEvent::Error { message },
                AgentEvent::Done => break,
            };
            let _ = sender.send(outgoing).await;
        }

        if needs_title {
            let client_name = active.as_ref().map(|opportunity| opportunity.client_name.as_str());
            thread.title = Some(self.titles.generate(&text, client_name).await);
            match self.save_thread(&mut thread, active.as_ref()).await {
                Ok(()) => {
                    let _ = sender.send(StreamEvent::ThreadUpdated { thread }).await;
                }
                Err(error) => {
                    tracing::error!(
                        event_name = "chat.thread.save_failed",
                        thread_id = %thread.id.0,
                        error = %error,
                        "could not store generated title"
                    );
                }
            }
        }
    }

    async fn persist(&self, item: ThreadItem) -> StreamEvent {
        match self.threads.add_item(&item).await {
            Ok(()) => StreamEvent::ItemDone { item },
            Err(error) => {
                tracing::error!(
                    event_name = "chat.item.save_failed",
                    thread_id = %item.thread_id.0,
                    error = %error,
                    "could not store thread item"
                );
                StreamEvent::Error { message: error.to_string() }
            }
        }
    }
}
