use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::opportunity::OpportunityId;
use crate::domain::short_id;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: ThreadId,
    pub title: Option<String>,
    pub opportunity_id: Option<OpportunityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ThreadId(short_id("thr")),
            title,
            opportunity_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadItemKind {
    UserMessage,
    AssistantMessage,
    ClientToolCall,
}

impl ThreadItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::ClientToolCall => "client_tool_call",
        }
    }
}

impl FromStr for ThreadItemKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user_message" => Ok(Self::UserMessage),
            "assistant_message" => Ok(Self::AssistantMessage),
            "client_tool_call" => Ok(Self::ClientToolCall),
            other => Err(DomainError::InvariantViolation(format!("unknown thread item `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadItem {
    pub id: String,
    pub thread_id: ThreadId,
    pub kind: ThreadItemKind,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl ThreadItem {
    fn new(thread_id: &ThreadId, kind: ThreadItemKind, content: Value) -> Self {
        Self {
            id: short_id("msg"),
            thread_id: thread_id.clone(),
            kind,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user_message(thread_id: &ThreadId, text: &str) -> Self {
        Self::new(thread_id, ThreadItemKind::UserMessage, json!({ "text": text }))
    }

    pub fn assistant_message(thread_id: &ThreadId, text: &str) -> Self {
        Self::new(thread_id, ThreadItemKind::AssistantMessage, json!({ "text": text }))
    }

    pub fn client_tool_call(thread_id: &ThreadId, name: &str, arguments: Value) -> Self {
        Self::new(
            thread_id,
            ThreadItemKind::ClientToolCall,
            json!({ "name": name, "arguments": arguments }),
        )
    }

    pub fn text(&self) -> Option<&str> {
        self.content.get("text").and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub after: Option<String>,
    pub order: SortOrder,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { limit: 20, after: None, order: SortOrder::Asc }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    pub after: Option<String>,
}

impl<T> Page<T> {
    /// Builds a page from up to `limit + 1` fetched rows; the extra row only signals `has_more`.
    pub fn from_overfetch(mut rows: Vec<T>, limit: usize, id_of: impl Fn(&T) -> String) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let after = if has_more { rows.last().map(id_of) } else { None };
        Self { data: rows, has_more, after }
    }
}
