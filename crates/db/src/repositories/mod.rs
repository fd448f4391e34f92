use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use consultai_core::domain::opportunity::{
    NewArtifact, Opportunity, OpportunityId, OpportunityPhase, PhaseArtifact,
};
use consultai_core::domain::task::{Task, TaskId, TaskStatus};
use consultai_core::domain::thread::{ChatThread, Page, PageRequest, ThreadId, ThreadItem};

pub mod memory;
pub mod opportunity;
pub mod task;
pub mod thread;

pub use memory::{
    InMemoryOpportunityRepository, InMemoryTaskRepository, InMemoryThreadRepository,
};
pub use opportunity::SqlOpportunityRepository;
pub use task::SqlTaskRepository;
pub use thread::SqlThreadRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Opportunities together with their phase progress, artifacts and the
/// single "active" selection.
#[async_trait]
pub trait OpportunityRepository: Send + Sync {
    /// Creates an opportunity in `pre_assessment`. It becomes the active one
    /// when nothing is currently selected.
    async fn create(
        &self,
        name: &str,
        client_name: &str,
        description: &str,
        stakeholders: Vec<String>,
    ) -> Result<Opportunity, RepositoryError>;

    async fn get(&self, id: &OpportunityId) -> Result<Option<Opportunity>, RepositoryError>;

    async fn get_active(&self) -> Result<Option<Opportunity>, RepositoryError>;

    /// Returns `false` when `id` is unknown; the current selection is kept.
    async fn set_active(&self, id: &OpportunityId) -> Result<bool, RepositoryError>;

    async fn list(&self) -> Result<Vec<Opportunity>, RepositoryError>;

    async fn add_artifact(
        &self,
        id: &OpportunityId,
        artifact: NewArtifact,
    ) -> Result<Option<PhaseArtifact>, RepositoryError>;

    async fn move_to_phase(
        &self,
        id: &OpportunityId,
        phase: OpportunityPhase,
    ) -> Result<Option<Opportunity>, RepositoryError>;

    async fn update_context(
        &self,
        id: &OpportunityId,
        context_summary: Option<String>,
        new_insight: Option<String>,
    ) -> Result<Option<Opportunity>, RepositoryError>;

    /// Removes the opportunity with its artifacts and progress rows, clearing
    /// the active selection when it pointed here.
    async fn delete(&self, id: &OpportunityId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(
        &self,
        title: &str,
        description: &str,
        phase: &str,
    ) -> Result<Task, RepositoryError>;

    async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Option<Task>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Task>, RepositoryError>;

    async fn list_by_phase(&self, phase: &str) -> Result<Vec<Task>, RepositoryError>;
}

/// Persisted chat threads and their items.
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    /// Inserts or updates thread metadata.
    async fn save_thread(&self, thread: &ChatThread) -> Result<(), RepositoryError>;

    async fn load_thread(&self, id: &ThreadId) -> Result<Option<ChatThread>, RepositoryError>;

    async fn list_threads(&self, page: &PageRequest)
        -> Result<Page<ChatThread>, RepositoryError>;

    /// Deletes the thread and every item in it.
    async fn delete_thread(&self, id: &ThreadId) -> Result<bool, RepositoryError>;

    /// Appends an item and bumps the thread's `updated_at`.
    async fn add_item(&self, item: &ThreadItem) -> Result<(), RepositoryError>;

    async fn list_items(
        &self,
        thread_id: &ThreadId,
        page: &PageRequest,
    ) -> Result<Page<ThreadItem>, RepositoryError>;

    async fn count_items(&self, thread_id: &ThreadId) -> Result<usize, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_string_list(column: &str, value: String) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid json list in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn encode_string_list(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
