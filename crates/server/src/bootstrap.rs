use std::sync::Arc;

use consultai_agent::{LlmError, OpenAiCompatibleClient};
use consultai_core::config::{AppConfig, ConfigError, DatabaseConfig, LoadOptions, StorageBackend};
use consultai_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::AuthSettings;
use crate::state::{AppState, Stores};

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
}

#[derive(Debug, Error)]
enum StoreSetupError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        storage_backend = config.storage.backend.as_str(),
        "starting application bootstrap"
    );

    let stores = select_stores(&config).await;
    let llm = OpenAiCompatibleClient::new(&config.llm)?;
    info!(
        event_name = "system.bootstrap.llm_ready",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        "llm client configured"
    );

    let state =
        AppState::new(stores, Arc::new(llm), &config.llm, AuthSettings::from(&config.auth));
    Ok(Application { config, state })
}

/// Falls back to in-memory stores when the database cannot be opened or migrated.
async fn select_stores(config: &AppConfig) -> Stores {
    if config.storage.backend == StorageBackend::Memory {
        return Stores::in_memory();
    }

    match open_database(&config.database).await {
        Ok(pool) => {
            info!(
                event_name = "system.bootstrap.database_ready",
                correlation_id = "bootstrap",
                "database connected and migrations applied"
            );
            Stores::database(pool)
        }
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.storage_fallback",
                correlation_id = "bootstrap",
                error = %error,
                "database unavailable, falling back to in-memory stores"
            );
            Stores::in_memory()
        }
    }
}

async fn open_database(config: &DatabaseConfig) -> Result<DbPool, StoreSetupError> {
    let pool = connect_with_settings(&config.url, config.max_connections, config.timeout_secs)
        .await
        .map_err(StoreSetupError::DatabaseConnect)?;
    migrations::run_pending(&pool).await.map_err(StoreSetupError::Migration)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use consultai_core::config::{ConfigOverrides, LoadOptions, StorageBackend};

    use super::bootstrap;

    fn options(backend: StorageBackend, database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                storage_backend: Some(backend),
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn memory_backend_needs_no_database() {
        let app = bootstrap(options(StorageBackend::Memory, "sqlite::memory:"))
            .await
            .expect("bootstrap");

        assert!(app.state.db_pool.is_none());
        assert!(app.state.opportunities.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn database_backend_runs_migrations() {
        let app = bootstrap(options(StorageBackend::Database, "sqlite::memory:"))
            .await
            .expect("bootstrap");

        let pool = app.state.db_pool.clone().expect("database pool");
        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('opportunities', 'tasks')",
        )
        .fetch_one(&pool)
        .await
        .expect("schema query");
        assert_eq!(tables, 2);

        let created = app
            .state
            .opportunities
            .create("ERP rollout", "Acme", "", Vec::new())
            .await
            .expect("create");
        assert_eq!(
            app.state.opportunities.get_active().await.expect("active").map(|opp| opp.id),
            Some(created.id)
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_falls_back_to_memory() {
        let app = bootstrap(options(StorageBackend::Database, "sqlite:///nonexistent-dir/x/consultai.db"))
            .await
            .expect("bootstrap");

        assert!(app.state.db_pool.is_none());
    }
}
