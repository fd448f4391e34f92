use sqlx::{sqlite::SqliteRow, Row};

use consultai_core::domain::opportunity::OpportunityId;
use consultai_core::domain::thread::{
    ChatThread, Page, PageRequest, SortOrder, ThreadId, ThreadItem, ThreadItemKind,
};

use super::{parse_timestamp, RepositoryError, ThreadRepository};
use crate::DbPool;

pub struct SqlThreadRepository {
    pool: DbPool,
}

impl SqlThreadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn page_limit(page: &PageRequest) -> i64 {
    i64::try_from(page.limit.saturating_add(1)).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl ThreadRepository for SqlThreadRepository {
    async fn save_thread(&self, thread: &ChatThread) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chatkit_threads (id, title, opportunity_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 opportunity_id = excluded.opportunity_id,
                 updated_at = excluded.updated_at",
        )
        .bind(&thread.id.0)
        .bind(thread.title.as_deref())
        .bind(thread.opportunity_id.as_ref().map(|id| id.0.as_str()))
        .bind(thread.created_at.to_rfc3339())
        .bind(thread.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_thread(&self, id: &ThreadId) -> Result<Option<ChatThread>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, title, opportunity_id, created_at, updated_at
             FROM chatkit_threads WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(thread_from_row).transpose()
    }

    async fn list_threads(
        &self,
        page: &PageRequest,
    ) -> Result<Page<ChatThread>, RepositoryError> {
        let sql = match page.order {
            SortOrder::Asc => {
                "SELECT id, title, opportunity_id, created_at, updated_at
                 FROM chatkit_threads
                 WHERE ?1 IS NULL
                    OR rowid > COALESCE((SELECT rowid FROM chatkit_threads WHERE id = ?1), 0)
                 ORDER BY rowid ASC
                 LIMIT ?2"
            }
            SortOrder::Desc => {
                "SELECT id, title, opportunity_id, created_at, updated_at
                 FROM chatkit_threads
                 WHERE ?1 IS NULL
                    OR rowid < COALESCE(
                        (SELECT rowid FROM chatkit_threads WHERE id = ?1),
                        9223372036854775807
                    )
                 ORDER BY rowid DESC
                 LIMIT ?2"
            }
        };

        let rows = sqlx::query(sql)
            .bind(page.after.as_deref())
            .bind(page_limit(page))
            .fetch_all(&self.pool)
            .await?;
        let threads = rows.iter().map(thread_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Page::from_overfetch(threads, page.limit, |thread| thread.id.0.clone()))
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM chatkit_threads WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_item(&self, item: &ThreadItem) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chatkit_thread_items (id, thread_id, kind, content_json, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.thread_id.0)
        .bind(item.kind.as_str())
        .bind(item.content.to_string())
        .bind(item.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chatkit_threads SET updated_at = ? WHERE id = ?")
            .bind(item.created_at.to_rfc3339())
            .bind(&item.thread_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_items(
        &self,
        thread_id: &ThreadId,
        page: &PageRequest,
    ) -> Result<Page<ThreadItem>, RepositoryError> {
        let sql = match page.order {
            SortOrder::Asc => {
                "SELECT id, thread_id, kind, content_json, created_at
                 FROM chatkit_thread_items
                 WHERE thread_id = ?1
                   AND (?2 IS NULL
                        OR rowid > COALESCE(
                            (SELECT rowid FROM chatkit_thread_items WHERE id = ?2),
                            0
                        ))
                 ORDER BY rowid ASC
                 LIMIT ?3"
            }
            SortOrder::Desc => {
                "SELECT id, thread_id, kind, content_json, created_at
                 FROM chatkit_thread_items
                 WHERE thread_id = ?1
                   AND (?2 IS NULL
                        OR rowid < COALESCE(
                            (SELECT rowid FROM chatkit_thread_items WHERE id = ?2),
                            9223372036854775807
                        ))
                 ORDER BY rowid DESC
                 LIMIT ?3"
            }
        };

        let rows = sqlx::query(sql)
            .bind(&thread_id.0)
            .bind(page.after.as_deref())
            .bind(page_limit(page))
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Page::from_overfetch(items, page.limit, |item| item.id.clone()))
    }

    async fn count_items(&self, thread_id: &ThreadId) -> Result<usize, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chatkit_thread_items WHERE thread_id = ?")
                .bind(&thread_id.0)
                .fetch_one(&self.pool)
                .await?;
        usize::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("invalid item count: {count}")))
    }
}

fn thread_from_row(row: &SqliteRow) -> Result<ChatThread, RepositoryError> {
    Ok(ChatThread {
        id: ThreadId(row.try_get("id")?),
        title: row.try_get("title")?,
        opportunity_id: row.try_get::<Option<String>, _>("opportunity_id")?.map(OpportunityId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<ThreadItem, RepositoryError> {
    let kind = row
        .try_get::<String, _>("kind")?
        .parse::<ThreadItemKind>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let raw_content: String = row.try_get("content_json")?;
    let content = serde_json::from_str(&raw_content).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `content_json`: {error}"))
    })?;

    Ok(ThreadItem {
        id: row.try_get("id")?,
        thread_id: ThreadId(row.try_get("thread_id")?),
        kind,
        content,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use consultai_core::domain::opportunity::OpportunityId;
    use consultai_core::domain::thread::{ChatThread, PageRequest, SortOrder, ThreadItem};

    use super::SqlThreadRepository;
    use crate::repositories::ThreadRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlThreadRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlThreadRepository::new(pool)
    }

    #[tokio::test]
    async fn save_thread_upserts_title_and_opportunity() {
        let repo = repo().await;
        let mut thread = ChatThread::new(None);
        repo.save_thread(&thread).await.expect("insert");

        thread.title = Some("Acme kickoff".to_string());
        thread.opportunity_id = Some(OpportunityId("opp_12345678".to_string()));
        repo.save_thread(&thread).await.expect("update");

        let loaded = repo.load_thread(&thread.id).await.expect("load").expect("thread");
        assert_eq!(loaded.title.as_deref(), Some("Acme kickoff"));
        assert_eq!(loaded.opportunity_id, thread.opportunity_id);
    }

    #[tokio::test]
    async fn threads_page_newest_first_with_cursor() {
        let repo = repo().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let thread = ChatThread::new(None);
            repo.save_thread(&thread).await.expect("save");
            ids.push(thread.id);
        }

        let request = PageRequest { limit: 2, after: None, order: SortOrder::Desc };
        let first = repo.list_threads(&request).await.expect("page");
        assert_eq!(
            first.data.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            vec![ids[2].clone(), ids[1].clone()]
        );
        assert!(first.has_more);

        let request = PageRequest { limit: 2, after: first.after.clone(), order: SortOrder::Desc };
        let second = repo.list_threads(&request).await.expect("page");
        assert_eq!(second.data.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), vec![ids[0].clone()]);
        assert!(!second.has_more);
        assert_eq!(second.after, None);
    }

    #[tokio::test]
    async fn items_round_trip_content_and_cascade_on_delete() {
        let repo = repo().await;
        let thread = ChatThread::new(None);
        repo.save_thread(&thread).await.expect("save");

        let call = ThreadItem::client_tool_call(
            &thread.id,
            "switch_theme",
            serde_json::json!({ "theme": "dark" }),
        );
        repo.add_item(&ThreadItem::user_message(&thread.id, "hello")).await.expect("add");
        repo.add_item(&call).await.expect("add call");

        let page = repo.list_items(&thread.id, &PageRequest::default()).await.expect("items");
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].text(), Some("hello"));
        assert_eq!(page.data[1], call);
        assert_eq!(repo.count_items(&thread.id).await.expect("count"), 2);

        assert!(repo.delete_thread(&thread.id).await.expect("delete"));
        assert_eq!(repo.count_items(&thread.id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn unknown_cursor_starts_from_the_first_page() {
        let repo = repo().await;
        let first = ChatThread::new(None);
        let second = ChatThread::new(None);
        repo.save_thread(&first).await.expect("save");
        repo.save_thread(&second).await.expect("save");
        repo.add_item(&ThreadItem::user_message(&first.id, "one")).await.expect("add");
        repo.add_item(&ThreadItem::user_message(&first.id, "two")).await.expect("add");

        let stale = Some("thr_missing".to_string());
        let desc = PageRequest { limit: 10, after: stale.clone(), order: SortOrder::Desc };
        let threads = repo.list_threads(&desc).await.expect("threads");
        assert_eq!(
            threads.data.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            vec![second.id.clone(), first.id.clone()]
        );

        let asc = PageRequest { limit: 10, after: stale, order: SortOrder::Asc };
        assert_eq!(repo.list_threads(&asc).await.expect("threads").data.len(), 2);

        let items = repo.list_items(&first.id, &asc).await.expect("items");
        let texts = items.data.iter().map(|i| i.text()).collect::<Vec<_>>();
        assert_eq!(texts, vec![Some("one"), Some("two")]);

        let items = repo.list_items(&first.id, &desc).await.expect("items");
        let texts = items.data.iter().map(|i| i.text()).collect::<Vec<_>>();
        assert_eq!(texts, vec![Some("two"), Some("one")]);
    }
}
