use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqliteConnection, Transaction};

use consultai_core::domain::opportunity::{
    ArtifactId, NewArtifact, Opportunity, OpportunityId, OpportunityPhase, OpportunityStatus,
    PhaseArtifact, PhaseProgress, PhaseStatus,
};

use super::{
    encode_string_list, parse_optional_timestamp, parse_string_list, parse_timestamp, parse_u32,
    OpportunityRepository, RepositoryError,
};
use crate::DbPool;

const OPPORTUNITY_COLUMNS: &str = "id, name, client_name, description, current_phase, status,
    stakeholders_json, context_summary, key_insights_json, created_at";

pub struct SqlOpportunityRepository {
    pool: DbPool,
}

impl SqlOpportunityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Takes the SQLite write lock up front; concurrent writers wait on `busy_timeout`.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, RepositoryError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn find(&self, id: &str) -> Result<Option<Opportunity>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_in(&mut *conn, id).await
    }
}

async fn find_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Opportunity>, RepositoryError> {
    let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;

    match row {
        Some(row) => Ok(Some(load_in(conn, &row).await?)),
        None => Ok(None),
    }
}

async fn load_in(
    conn: &mut SqliteConnection,
    row: &SqliteRow,
) -> Result<Opportunity, RepositoryError> {
    let mut opportunity = opportunity_from_row(row)?;

    let progress_rows = sqlx::query(
        "SELECT phase, status, start_date, end_date, key_activities_json,
                artifacts_count, completion_percentage
         FROM phase_progress
         WHERE opportunity_id = ?",
    )
    .bind(&opportunity.id.0)
    .fetch_all(&mut *conn)
    .await?;
    let mut progress = BTreeMap::new();
    for row in progress_rows {
        let entry = progress_from_row(&row)?;
        progress.insert(entry.phase, entry);
    }
    opportunity.phase_progress = progress;

    let artifact_rows = sqlx::query(
        "SELECT id, title, content, artifact_type, phase, created_by, tags_json, created_at
         FROM artifacts
         WHERE opportunity_id = ?
         ORDER BY rowid ASC",
    )
    .bind(&opportunity.id.0)
    .fetch_all(&mut *conn)
    .await?;
    opportunity.artifacts =
        artifact_rows.iter().map(artifact_from_row).collect::<Result<Vec<_>, _>>()?;

    Ok(opportunity)
}

#[async_trait::async_trait]
impl OpportunityRepository for SqlOpportunityRepository {
    async fn create(
        &self,
        name: &str,
        client_name: &str,
        description: &str,
        stakeholders: Vec<String>,
    ) -> Result<Opportunity, RepositoryError> {
        let opportunity = Opportunity::new(name, client_name, description, stakeholders);
        let mut tx = self.begin_write().await?;

        sqlx::query(
            "INSERT INTO opportunities (id, name, client_name, description, current_phase, status,
                                        stakeholders_json, context_summary, key_insights_json,
                                        created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&opportunity.id.0)
        .bind(&opportunity.name)
        .bind(&opportunity.client_name)
        .bind(&opportunity.description)
        .bind(opportunity.current_phase.as_str())
        .bind(opportunity.status.as_str())
        .bind(encode_string_list(&opportunity.stakeholders))
        .bind(&opportunity.context_summary)
        .bind(encode_string_list(&opportunity.key_insights))
        .bind(opportunity.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for progress in opportunity.phase_progress.values() {
            upsert_progress(&mut tx, &opportunity.id, progress).await?;
        }

        sqlx::query(
            "INSERT INTO active_opportunity (slot, opportunity_id) VALUES (1, ?)
             ON CONFLICT(slot) DO NOTHING",
        )
        .bind(&opportunity.id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(opportunity)
    }

    async fn get(&self, id: &OpportunityId) -> Result<Option<Opportunity>, RepositoryError> {
        self.find(&id.0).await
    }

    async fn get_active(&self) -> Result<Option<Opportunity>, RepositoryError> {
        let active_id: Option<String> =
            sqlx::query_scalar("SELECT opportunity_id FROM active_opportunity WHERE slot = 1")
                .fetch_optional(&self.pool)
                .await?;

        match active_id {
            Some(id) => self.find(&id).await,
            None => Ok(None),
        }
    }

    async fn set_active(&self, id: &OpportunityId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO active_opportunity (slot, opportunity_id)
             SELECT 1, id FROM opportunities WHERE id = ?
             ON CONFLICT(slot) DO UPDATE SET opportunity_id = excluded.opportunity_id",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Opportunity>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(&mut *conn)
        .await?;

        let mut opportunities = Vec::with_capacity(rows.len());
        for row in &rows {
            opportunities.push(load_in(&mut *conn, row).await?);
        }
        Ok(opportunities)
    }

    async fn add_artifact(
        &self,
        id: &OpportunityId,
        artifact: NewArtifact,
    ) -> Result<Option<PhaseArtifact>, RepositoryError> {
        let mut tx = self.begin_write().await?;

        let current_phase: Option<String> =
            sqlx::query_scalar("SELECT current_phase FROM opportunities WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current_phase) = current_phase else {
            return Ok(None);
        };
        let current_phase = parse_phase(&current_phase)?;

        let saved = artifact.into_artifact(current_phase);
        let phase = saved.phase;

        sqlx::query(
            "INSERT INTO artifacts (id, opportunity_id, title, content, artifact_type, phase,
                                    created_by, tags_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&saved.id.0)
        .bind(&id.0)
        .bind(&saved.title)
        .bind(&saved.content)
        .bind(&saved.artifact_type)
        .bind(saved.phase.as_str())
        .bind(saved.created_by.as_deref())
        .bind(encode_string_list(&saved.tags))
        .bind(saved.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE phase_progress SET artifacts_count = artifacts_count + 1
             WHERE opportunity_id = ? AND phase = ?",
        )
        .bind(&id.0)
        .bind(phase.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(saved))
    }

    async fn move_to_phase(
        &self,
        id: &OpportunityId,
        phase: OpportunityPhase,
    ) -> Result<Option<Opportunity>, RepositoryError> {
        let mut tx = self.begin_write().await?;
        let Some(mut opportunity) = find_in(&mut *tx, &id.0).await? else {
            return Ok(None);
        };
        let previous = opportunity.current_phase;
        opportunity.move_to_phase(phase);

        sqlx::query("UPDATE opportunities SET current_phase = ? WHERE id = ?")
            .bind(phase.as_str())
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        for touched in [previous, phase] {
            if let Some(progress) = opportunity.progress(touched) {
                upsert_progress(&mut tx, id, progress).await?;
            }
        }
        tx.commit().await?;

        Ok(Some(opportunity))
    }

    async fn update_context(
        &self,
        id: &OpportunityId,
        context_summary: Option<String>,
        new_insight: Option<String>,
    ) -> Result<Option<Opportunity>, RepositoryError> {
        let mut tx = self.begin_write().await?;
        let Some(mut opportunity) = find_in(&mut *tx, &id.0).await? else {
            return Ok(None);
        };
        opportunity.update_context(context_summary, new_insight);

        sqlx::query(
            "UPDATE opportunities SET context_summary = ?, key_insights_json = ? WHERE id = ?",
        )
        .bind(&opportunity.context_summary)
        .bind(encode_string_list(&opportunity.key_insights))
        .bind(&id.0)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(opportunity))
    }

    async fn delete(&self, id: &OpportunityId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM opportunities WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn upsert_progress(
    tx: &mut Transaction<'_, Sqlite>,
    opportunity_id: &OpportunityId,
    progress: &PhaseProgress,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO phase_progress (opportunity_id, phase, status, start_date, end_date,
                                     key_activities_json, artifacts_count, completion_percentage)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(opportunity_id, phase) DO UPDATE SET
             status = excluded.status,
             start_date = excluded.start_date,
             end_date = excluded.end_date,
             key_activities_json = excluded.key_activities_json,
             completion_percentage = excluded.completion_percentage",
    )
    .bind(&opportunity_id.0)
    .bind(progress.phase.as_str())
    .bind(progress.status.as_str())
    .bind(progress.start_date.map(|value| value.to_rfc3339()))
    .bind(progress.end_date.map(|value| value.to_rfc3339()))
    .bind(encode_string_list(&progress.key_activities))
    .bind(i64::from(progress.artifacts_count))
    .bind(i64::from(progress.completion_percentage))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn parse_phase(value: &str) -> Result<OpportunityPhase, RepositoryError> {
    value
        .parse()
        .map_err(|error: consultai_core::DomainError| RepositoryError::Decode(error.to_string()))
}

fn opportunity_from_row(row: &SqliteRow) -> Result<Opportunity, RepositoryError> {
    let current_phase = parse_phase(&row.try_get::<String, _>("current_phase")?)?;
    let status = row
        .try_get::<String, _>("status")?
        .parse::<OpportunityStatus>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Opportunity {
        id: OpportunityId(row.try_get("id")?),
        name: row.try_get("name")?,
        client_name: row.try_get("client_name")?,
        description: row.try_get("description")?,
        current_phase,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        phase_progress: BTreeMap::new(),
        artifacts: Vec::new(),
        stakeholders: parse_string_list("stakeholders_json", row.try_get("stakeholders_json")?)?,
        context_summary: row.try_get("context_summary")?,
        key_insights: parse_string_list("key_insights_json", row.try_get("key_insights_json")?)?,
    })
}

fn progress_from_row(row: &SqliteRow) -> Result<PhaseProgress, RepositoryError> {
    let status = row
        .try_get::<String, _>("status")?
        .parse::<PhaseStatus>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let completion = parse_u32("completion_percentage", row.try_get("completion_percentage")?)?;

    Ok(PhaseProgress {
        phase: parse_phase(&row.try_get::<String, _>("phase")?)?,
        status,
        start_date: parse_optional_timestamp("start_date", row.try_get("start_date")?)?,
        end_date: parse_optional_timestamp("end_date", row.try_get("end_date")?)?,
        key_activities: parse_string_list(
            "key_activities_json",
            row.try_get("key_activities_json")?,
        )?,
        artifacts_count: parse_u32("artifacts_count", row.try_get("artifacts_count")?)?,
        completion_percentage: u8::try_from(completion.min(100)).unwrap_or(100),
    })
}

fn artifact_from_row(row: &SqliteRow) -> Result<PhaseArtifact, RepositoryError> {
    Ok(PhaseArtifact {
        id: ArtifactId(row.try_get("id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        artifact_type: row.try_get("artifact_type")?,
        phase: parse_phase(&row.try_get::<String, _>("phase")?)?,
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        tags: parse_string_list("tags_json", row.try_get("tags_json")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use consultai_core::domain::opportunity::{
        NewArtifact, OpportunityId, OpportunityPhase, PhaseStatus,
    };
    use tempfile::TempDir;
    use tokio::task::JoinSet;

    use super::SqlOpportunityRepository;
    use crate::repositories::OpportunityRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    /// File-backed pool with several connections, so writers really overlap.
    async fn shared_file_repo() -> (TempDir, Arc<SqlOpportunityRepository>) {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("consultai.db").display());
        let pool = connect_with_settings(&url, 5, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        (dir, Arc::new(SqlOpportunityRepository::new(pool)))
    }

    fn interview_notes() -> NewArtifact {
        NewArtifact {
            title: "Ops interview".to_string(),
            content: "Month-end close takes nine days".to_string(),
            artifact_type: "interview".to_string(),
            phase: None,
            created_by: Some("agent".to_string()),
            tags: vec!["finance".to_string(), "close".to_string()],
        }
    }

    #[tokio::test]
    async fn create_persists_eager_progress_and_active_selection() {
        let repo = SqlOpportunityRepository::new(setup().await);

        let acme = repo
            .create("Acme", "Acme Corp", "ERP", vec!["CFO".to_string()])
            .await
            .expect("create");
        repo.create("Globex", "Globex Inc", "", Vec::new()).await.expect("create second");

        let active = repo.get_active().await.expect("active").expect("some active");
        assert_eq!(active.id, acme.id);
        assert_eq!(active.stakeholders, vec!["CFO".to_string()]);
        assert_eq!(active.phase_progress.len(), OpportunityPhase::ALL.len());
        assert_eq!(
            active.progress(OpportunityPhase::PreAssessment).map(|p| p.status),
            Some(PhaseStatus::InProgress)
        );
        assert_eq!(
            active.progress(OpportunityPhase::Implementation).map(|p| p.status),
            Some(PhaseStatus::NotStarted)
        );
    }

    #[tokio::test]
    async fn add_artifact_counts_and_round_trips_tags() {
        let repo = SqlOpportunityRepository::new(setup().await);
        let acme = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");

        let saved =
            repo.add_artifact(&acme.id, interview_notes()).await.expect("add").expect("opp");
        assert_eq!(saved.phase, OpportunityPhase::PreAssessment);

        let stored = repo.get(&acme.id).await.expect("get").expect("opp");
        assert_eq!(stored.artifacts, vec![saved]);
        assert_eq!(
            stored.progress(OpportunityPhase::PreAssessment).map(|p| p.artifacts_count),
            Some(1)
        );

        let missing = repo
            .add_artifact(&OpportunityId("opp_missing".to_string()), interview_notes())
            .await
            .expect("add");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn move_to_phase_persists_both_progress_rows() {
        let repo = SqlOpportunityRepository::new(setup().await);
        let acme = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");
        repo.add_artifact(&acme.id, interview_notes()).await.expect("add");

        repo.move_to_phase(&acme.id, OpportunityPhase::SolutionDesign).await.expect("move");

        let stored = repo.get(&acme.id).await.expect("get").expect("opp");
        assert_eq!(stored.current_phase, OpportunityPhase::SolutionDesign);
        let old = stored.progress(OpportunityPhase::PreAssessment).expect("old");
        assert_eq!(old.status, PhaseStatus::Completed);
        assert_eq!(old.completion_percentage, 100);
        assert_eq!(old.artifacts_count, 1);
        assert!(old.end_date.is_some());
        let new = stored.progress(OpportunityPhase::SolutionDesign).expect("new");
        assert_eq!(new.status, PhaseStatus::InProgress);
        assert!(new.start_date.is_some());
    }

    #[tokio::test]
    async fn update_context_deduplicates_insights() {
        let repo = SqlOpportunityRepository::new(setup().await);
        let acme = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");

        repo.update_context(&acme.id, None, Some("X".to_string())).await.expect("first");
        repo.update_context(&acme.id, Some("Sponsor is the CFO".to_string()), Some("X".to_string()))
            .await
            .expect("second");

        let stored = repo.get(&acme.id).await.expect("get").expect("opp");
        assert_eq!(stored.key_insights, vec!["X".to_string()]);
        assert_eq!(stored.context_summary, "Sponsor is the CFO");
    }

    #[tokio::test]
    async fn list_is_newest_first_and_set_active_validates_id() {
        let repo = SqlOpportunityRepository::new(setup().await);
        let first = repo.create("A", "A Co", "", Vec::new()).await.expect("create");
        let second = repo.create("B", "B Co", "", Vec::new()).await.expect("create");

        let ids = repo.list().await.expect("list").into_iter().map(|o| o.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

        assert!(!repo.set_active(&OpportunityId("nonexistent".to_string())).await.expect("set"));
        assert_eq!(repo.get_active().await.expect("active").map(|o| o.id), Some(first.id));

        assert!(repo.set_active(&second.id).await.expect("set"));
        assert_eq!(repo.get_active().await.expect("active").map(|o| o.id), Some(second.id));
    }

    #[tokio::test]
    async fn delete_cascades_and_clears_active() {
        let pool = setup().await;
        let repo = SqlOpportunityRepository::new(pool.clone());
        let acme = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");
        repo.add_artifact(&acme.id, interview_notes()).await.expect("add");

        assert!(repo.delete(&acme.id).await.expect("delete"));
        assert!(!repo.delete(&acme.id).await.expect("delete again"));
        assert!(repo.get_active().await.expect("active").is_none());

        let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
            .fetch_one(&pool)
            .await
            .expect("count artifacts");
        assert_eq!(orphaned, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_artifact_inserts_all_land() {
        let (_dir, repo) = shared_file_repo().await;
        let acme = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");

        let mut writers = JoinSet::new();
        for _ in 0..40 {
            let repo = repo.clone();
            let id = acme.id.clone();
            writers.spawn(async move { repo.add_artifact(&id, interview_notes()).await });
        }
        while let Some(joined) = writers.join_next().await {
            let saved = joined.expect("join").expect("add_artifact should not fail");
            assert!(saved.is_some());
        }

        let stored = repo.get(&acme.id).await.expect("get").expect("opp");
        assert_eq!(stored.artifacts.len(), 40);
        assert_eq!(
            stored.progress(OpportunityPhase::PreAssessment).map(|p| p.artifacts_count),
            Some(40)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_phase_moves_leave_one_phase_in_progress() {
        let (_dir, repo) = shared_file_repo().await;

        for _ in 0..20 {
            let opportunity = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");

            let mut moves = JoinSet::new();
            for phase in [OpportunityPhase::Discovery, OpportunityPhase::SolutionDesign] {
                let repo = repo.clone();
                let id = opportunity.id.clone();
                moves.spawn(async move { repo.move_to_phase(&id, phase).await });
            }
            while let Some(joined) = moves.join_next().await {
                joined.expect("join").expect("move").expect("opportunity");
            }

            let stored = repo.get(&opportunity.id).await.expect("get").expect("opp");
            let in_progress = stored
                .phase_progress
                .values()
                .filter(|progress| progress.status == PhaseStatus::InProgress)
                .map(|progress| progress.phase)
                .collect::<Vec<_>>();
            assert_eq!(in_progress, vec![stored.current_phase]);
            assert_eq!(
                stored.progress(OpportunityPhase::PreAssessment).map(|p| p.status),
                Some(PhaseStatus::Completed)
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_insights_are_all_kept() {
        let (_dir, repo) = shared_file_repo().await;
        let acme = repo.create("Acme", "Acme Corp", "", Vec::new()).await.expect("create");

        let mut writers = JoinSet::new();
        for index in 0..10 {
            let repo = repo.clone();
            let id = acme.id.clone();
            writers.spawn(async move {
                repo.update_context(&id, None, Some(format!("insight {index}"))).await
            });
        }
        while let Some(joined) = writers.join_next().await {
            joined.expect("join").expect("update_context").expect("opportunity");
        }

        let stored = repo.get(&acme.id).await.expect("get").expect("opp");
        assert_eq!(stored.key_insights.len(), 10);
    }
}
