//! HTTP surface of the consulting assistant: REST endpoints for opportunities
//! and tasks, the `/chatkit` chat protocol and a health probe.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod chat;
pub mod health;
pub mod logging;
pub mod state;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use consultai_core::config::ServerConfig;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use state::{AppState, Stores};

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let protected = Router::new()
        .route("/tasks", get(api::list_tasks))
        .route("/opportunities", get(api::list_opportunities).post(api::create_opportunity))
        .route("/opportunities/active", get(api::active_opportunity))
        .route("/opportunities/{id}", axum::routing::delete(api::delete_opportunity))
        .route("/opportunities/{id}/activate", post(api::activate_opportunity))
        .route("/opportunities/{id}/artifacts", post(api::add_artifact))
        .route("/opportunities/{id}/phase", post(api::change_phase))
        .route("/opportunities/{id}/context", post(api::update_context))
        .route("/chatkit", post(chat::chatkit))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_user));

    Router::new()
        .route("/health", get(health::health))
        .merge(protected)
        .layer(cors_layer(&server.cors_allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin.trim() == "*") {
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(event_name = "system.cors.invalid_origin", origin = %origin, "ignoring origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new().allow_origin(parsed).allow_methods(Any).allow_headers(Any)
}
