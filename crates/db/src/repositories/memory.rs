use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;

use consultai_core::domain::opportunity::{
    NewArtifact, Opportunity, OpportunityId, OpportunityPhase, PhaseArtifact,
};
use consultai_core::domain::task::{Task, TaskId, TaskStatus};
use consultai_core::domain::thread::{
    ChatThread, Page, PageRequest, SortOrder, ThreadId, ThreadItem,
};

use super::{OpportunityRepository, RepositoryError, TaskRepository, ThreadRepository};

#[derive(Default)]
struct OpportunityState {
    opportunities: HashMap<String, Opportunity>,
    order: Vec<String>,
    active: Option<String>,
}

/// Process-local opportunity store. Every operation runs under one mutex.
#[derive(Default)]
pub struct InMemoryOpportunityRepository {
    state: Mutex<OpportunityState>,
}

#[async_trait::async_trait]
impl OpportunityRepository for InMemoryOpportunityRepository {
    async fn create(
        &self,
        name: &str,
        client_name: &str,
        description: &str,
        stakeholders: Vec<String>,
    ) -> Result<Opportunity, RepositoryError> {
        let opportunity = Opportunity::new(name, client_name, description, stakeholders);
        let id = opportunity.id.0.clone();

        let mut state = self.state.lock().await;
        state.opportunities.insert(id.clone(), opportunity.clone());
        state.order.push(id.clone());
        if state.active.is_none() {
            state.active = Some(id);
        }

        Ok(opportunity)
    }

    async fn get(&self, id: &OpportunityId) -> Result<Option<Opportunity>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.opportunities.get(&id.0).cloned())
    }

    async fn get_active(&self) -> Result<Option<Opportunity>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.active.as_ref().and_then(|id| state.opportunities.get(id)).cloned())
    }

    async fn set_active(&self, id: &OpportunityId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.opportunities.contains_key(&id.0) {
            return Ok(false);
        }
        state.active = Some(id.0.clone());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<Opportunity>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.order.iter().filter_map(|id| state.opportunities.get(id)).cloned().collect())
    }

    async fn add_artifact(
        &self,
        id: &OpportunityId,
        artifact: NewArtifact,
    ) -> Result<Option<PhaseArtifact>, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state.opportunities.get_mut(&id.0).map(|opportunity| opportunity.add_artifact(artifact)))
    }

    async fn move_to_phase(
        &self,
        id: &OpportunityId,
        phase: OpportunityPhase,
    ) -> Result<Option<Opportunity>, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state.opportunities.get_mut(&id.0).map(|opportunity| {
            opportunity.move_to_phase(phase);
            opportunity.clone()
        }))
    }

    async fn update_context(
        &self,
        id: &OpportunityId,
        context_summary: Option<String>,
        new_insight: Option<String>,
    ) -> Result<Option<Opportunity>, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state.opportunities.get_mut(&id.0).map(|opportunity| {
            opportunity.update_context(context_summary, new_insight);
            opportunity.clone()
        }))
    }

    async fn delete(&self, id: &OpportunityId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.opportunities.remove(&id.0).is_none() {
            return Ok(false);
        }
        state.order.retain(|existing| existing != &id.0);
        if state.active.as_deref() == Some(id.0.as_str()) {
            state.active = None;
        }
        Ok(true)
    }
}

#[derive(Default)]
struct TaskState {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    state: Mutex<TaskState>,
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(
        &self,
        title: &str,
        description: &str,
        phase: &str,
    ) -> Result<Task, RepositoryError> {
        let task = Task::new(title, description, phase);
        let mut state = self.state.lock().await;
        state.order.push(task.id.0.clone());
        state.tasks.insert(task.id.0.clone(), task.clone());
        Ok(task)
    }

    async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Option<Task>, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state.tasks.get_mut(&id.0).map(|task| {
            task.status = status;
            task.clone()
        }))
    }

    async fn list_all(&self) -> Result<Vec<Task>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.order.iter().filter_map(|id| state.tasks.get(id)).cloned().collect())
    }

    async fn list_by_phase(&self, phase: &str) -> Result<Vec<Task>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| task.phase == phase)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ThreadState {
    threads: HashMap<String, ChatThread>,
    order: Vec<String>,
    items: HashMap<String, Vec<ThreadItem>>,
}

#[derive(Default)]
pub struct InMemoryThreadRepository {
    state: Mutex<ThreadState>,
}

/// Applies cursor pagination over rows already sorted ascending.
fn paginate<'a, T: Clone + 'a>(
    rows: impl DoubleEndedIterator<Item = &'a T>,
    request: &PageRequest,
    id_of: impl Fn(&T) -> String,
) -> Page<T> {
    let ordered: Vec<&T> = match request.order {
        SortOrder::Asc => rows.collect(),
        SortOrder::Desc => rows.rev().collect(),
    };

    // An unknown cursor restarts from the first row.
    let start = request
        .after
        .as_deref()
        .and_then(|after| ordered.iter().position(|row| id_of(*row) == after))
        .map_or(0, |index| index + 1);

    let window =
        ordered.into_iter().skip(start).take(request.limit + 1).cloned().collect::<Vec<_>>();
    Page::from_overfetch(window, request.limit, id_of)
}

#[async_trait::async_trait]
impl ThreadRepository for InMemoryThreadRepository {
    async fn save_thread(&self, thread: &ChatThread) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.threads.contains_key(&thread.id.0) {
            state.order.push(thread.id.0.clone());
        }
        state.threads.insert(thread.id.0.clone(), thread.clone());
        Ok(())
    }

    async fn load_thread(&self, id: &ThreadId) -> Result<Option<ChatThread>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.threads.get(&id.0).cloned())
    }

    async fn list_threads(
        &self,
        page: &PageRequest,
    ) -> Result<Page<ChatThread>, RepositoryError> {
        let state = self.state.lock().await;
        let rows = state.order.iter().filter_map(|id| state.threads.get(id)).collect::<Vec<_>>();
        Ok(paginate(rows.into_iter(), page, |thread| thread.id.0.clone()))
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.threads.remove(&id.0).is_none() {
            return Ok(false);
        }
        state.order.retain(|existing| existing != &id.0);
        state.items.remove(&id.0);
        Ok(true)
    }

    async fn add_item(&self, item: &ThreadItem) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(thread) = state.threads.get_mut(&item.thread_id.0) {
            thread.updated_at = Utc::now();
        }
        state.items.entry(item.thread_id.0.clone()).or_default().push(item.clone());
        Ok(())
    }

    async fn list_items(
        &self,
        thread_id: &ThreadId,
        page: &PageRequest,
    ) -> Result<Page<ThreadItem>, RepositoryError> {
        let state = self.state.lock().await;
        let items = state.items.get(&thread_id.0).map(Vec::as_slice).unwrap_or_default();
        Ok(paginate(items.iter(), page, |item| item.id.clone()))
    }

    async fn count_items(&self, thread_id: &ThreadId) -> Result<usize, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.items.get(&thread_id.0).map(Vec::len).unwrap_or(0))
    }
}
