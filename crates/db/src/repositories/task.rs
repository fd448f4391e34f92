use sqlx::{sqlite::SqliteRow, Row};

use consultai_core::domain::task::{Task, TaskId, TaskStatus};

use super::{parse_timestamp, RepositoryError, TaskRepository};
use crate::DbPool;

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn create(
        &self,
        title: &str,
        description: &str,
        phase: &str,
    ) -> Result<Task, RepositoryError> {
        let task = Task::new(title, description, phase);

        sqlx::query(
            "INSERT INTO tasks (id, title, description, phase, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id.0)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.phase)
        .bind(task.status.as_str())
        .bind(task.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(task)
    }

    async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Option<Task>, RepositoryError> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, title, description, phase, status, created_at FROM tasks WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, title, description, phase, status, created_at
             FROM tasks
             ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn list_by_phase(&self, phase: &str) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, title, description, phase, status, created_at
             FROM tasks
             WHERE phase = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(phase)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task, RepositoryError> {
    let status = row
        .try_get::<String, _>("status")?
        .parse::<TaskStatus>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        phase: row.try_get("phase")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use consultai_core::domain::task::{TaskId, TaskStatus};

    use super::SqlTaskRepository;
    use crate::repositories::TaskRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlTaskRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlTaskRepository::new(pool)
    }

    #[tokio::test]
    async fn create_then_update_status_round_trip() {
        let repo = repo().await;
        let task = repo.create("Draft SOW", "Scope and pricing", "discovery").await.expect("create");

        assert_eq!(repo.list_all().await.expect("list"), vec![task.clone()]);

        let updated = repo
            .update_status(&task.id, TaskStatus::InProgress)
            .await
            .expect("update")
            .expect("task exists");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.title, task.title);
        assert_eq!(updated.description, task.description);
        assert_eq!(updated.phase, task.phase);
    }

    #[tokio::test]
    async fn update_status_on_unknown_task_returns_none() {
        let repo = repo().await;
        let result = repo
            .update_status(&TaskId("task_missing".to_string()), TaskStatus::Completed)
            .await
            .expect("update");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_by_phase_keeps_creation_order() {
        let repo = repo().await;
        let first = repo.create("Interview ops", "", "discovery").await.expect("create");
        repo.create("Kickoff deck", "", "pre_assessment").await.expect("create");
        let third = repo.create("Map processes", "", "discovery").await.expect("create");

        let ids = repo
            .list_by_phase("discovery")
            .await
            .expect("list")
            .into_iter()
            .map(|task| task.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![first.id, third.id]);
    }
}
