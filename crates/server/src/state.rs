use std::sync::Arc;

use consultai_agent::{
    consulting_registry, ChatServer, LlmClient, TitleGenerator, ToolContext, ToolLoopAgent,
};
use consultai_core::config::{LlmConfig, StorageBackend};
use consultai_db::repositories::{
    InMemoryOpportunityRepository, InMemoryTaskRepository, InMemoryThreadRepository,
    OpportunityRepository, SqlOpportunityRepository, SqlTaskRepository, SqlThreadRepository,
    TaskRepository, ThreadRepository,
};
use consultai_db::{ConsultingStore, DbPool};

use crate::auth::AuthSettings;

/// The persistent stores behind one storage backend.
#[derive(Clone)]
pub struct Stores {
    pub backend: StorageBackend,
    pub opportunities: Arc<dyn OpportunityRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub threads: Arc<dyn ThreadRepository>,
    pub db_pool: Option<DbPool>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            opportunities: Arc::new(InMemoryOpportunityRepository::default()),
            tasks: Arc::new(InMemoryTaskRepository::default()),
            threads: Arc::new(InMemoryThreadRepository::default()),
            db_pool: None,
        }
    }

    pub fn database(pool: DbPool) -> Self {
        Self {
            backend: StorageBackend::Database,
            opportunities: Arc::new(SqlOpportunityRepository::new(pool.clone())),
            tasks: Arc::new(SqlTaskRepository::new(pool.clone())),
            threads: Arc::new(SqlThreadRepository::new(pool.clone())),
            db_pool: Some(pool),
        }
    }
}

/// Shared handler state. Everything is constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub opportunities: Arc<dyn OpportunityRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub consulting: Arc<ConsultingStore>,
    pub chat: ChatServer,
    pub auth: AuthSettings,
    pub db_pool: Option<DbPool>,
}

impl AppState {
    pub fn new(stores: Stores, llm: Arc<dyn LlmClient>, llm_config: &LlmConfig, auth: AuthSettings) -> Self {
        let consulting = Arc::new(ConsultingStore::default());
        let tools = consulting_registry(ToolContext {
            opportunities: stores.opportunities.clone(),
            tasks: stores.tasks.clone(),
            consulting: consulting.clone(),
            llm: llm.clone(),
        });
        let agent = ToolLoopAgent::new(llm.clone(), Arc::new(tools), llm_config.max_tool_turns);
        let titles = TitleGenerator::new(llm, Some(llm_config.title_model.clone()));
        let chat = ChatServer::new(
            stores.threads.clone(),
            stores.opportunities.clone(),
            Arc::new(agent),
            titles,
        );

        Self {
            opportunities: stores.opportunities,
            tasks: stores.tasks,
            consulting,
            chat,
            auth,
            db_pool: stores.db_pool,
        }
    }
}
