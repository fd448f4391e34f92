use axum::{extract::State, http::StatusCode, Json};
use consultai_db::DbPool;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    check(state.db_pool.as_ref()).await
}

/// Memory-backed servers are always healthy; database-backed ones need a live pool.
pub async fn check(db_pool: Option<&DbPool>) -> (StatusCode, Json<HealthResponse>) {
    let Some(pool) = db_pool else {
        return (StatusCode::OK, Json(HealthResponse { status: "healthy", detail: None }));
    };

    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "healthy", detail: None })),
        Err(error) => {
            warn!(event_name = "http.health.degraded", error = %error, "database check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    detail: Some(format!("database query failed: {error}")),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, Json};
    use consultai_db::connect_with_settings;

    use super::check;

    #[tokio::test]
    async fn healthy_without_a_database() {
        let (status, Json(payload)) = check(None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "healthy");
        assert_eq!(serde_json::to_value(&payload).expect("json"), serde_json::json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn healthy_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = check(Some(&pool)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "healthy");
        pool.close().await;
    }

    #[tokio::test]
    async fn service_unavailable_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = check(Some(&pool)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert!(payload.detail.is_some());
    }
}
