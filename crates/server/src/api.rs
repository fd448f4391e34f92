//! REST surface for opportunities and tasks.
//!
//! Lookup and validation failures are reported as HTTP 200 with an
//! `{"error": ...}` body, which is what the web client expects.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use consultai_core::domain::split_list;
use consultai_core::{NewArtifact, OpportunityId, OpportunityPhase};
use consultai_db::repositories::RepositoryError;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Opportunity not found")]
    OpportunityNotFound,
    #[error("Failed to add artifact")]
    ArtifactRejected,
    #[error("Phase is required")]
    PhaseRequired,
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),
    #[error("storage failure: {0}")]
    Repository(#[from] RepositoryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Repository(source) = &self {
            error!(event_name = "http.api.storage_failed", error = %source, "storage call failed");
        }
        Json(json!({ "error": self.to_string() })).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn parse_phase(raw: &str) -> Result<OpportunityPhase, ApiError> {
    raw.parse().map_err(|_| ApiError::InvalidPhase(raw.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskFilter {
    pub phase: Option<String>,
}

pub async fn list_tasks(State(state): State<AppState>, Query(filter): Query<TaskFilter>) -> ApiResult {
    let tasks = match filter.phase.as_deref().filter(|phase| !phase.is_empty()) {
        Some(phase) => state.tasks.list_by_phase(phase).await?,
        None => state.tasks.list_all().await?,
    };
    Ok(Json(json!({ "tasks": tasks })))
}

pub async fn list_opportunities(State(state): State<AppState>) -> ApiResult {
    let opportunities: Vec<_> =
        state.opportunities.list().await?.iter().map(|opportunity| opportunity.view()).collect();
    Ok(Json(json!({ "opportunities": opportunities })))
}

pub async fn active_opportunity(State(state): State<AppState>) -> ApiResult {
    let Some(opportunity) = state.opportunities.get_active().await? else {
        return Ok(Json(json!({ "opportunity": null })));
    };

    Ok(Json(json!({
        "opportunity": opportunity.view(),
        "phaseArtifacts": opportunity.phase_artifacts(None),
        "allArtifacts": opportunity.artifacts,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOpportunity {
    pub name: String,
    pub client_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stakeholders: Option<String>,
}

pub async fn create_opportunity(
    State(state): State<AppState>,
    Json(body): Json<CreateOpportunity>,
) -> ApiResult {
    let stakeholders = body.stakeholders.as_deref().map(split_list).unwrap_or_default();
    let opportunity = state
        .opportunities
        .create(&body.name, &body.client_name, &body.description, stakeholders)
        .await?;

    info!(
        event_name = "http.opportunity.created",
        opportunity_id = %opportunity.id.0,
        client = %opportunity.client_name,
        "opportunity created"
    );
    Ok(Json(json!({ "opportunity": opportunity.view() })))
}

pub async fn activate_opportunity(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = OpportunityId(id);
    if !state.opportunities.set_active(&id).await? {
        return Err(ApiError::OpportunityNotFound);
    }

    let opportunity = state.opportunities.get(&id).await?;
    Ok(Json(json!({ "opportunity": opportunity.map(|opportunity| opportunity.view()) })))
}

#[derive(Debug, Deserialize)]
pub struct ArtifactBody {
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "createdBy")]
    pub created_by: Option<String>,
}

pub async fn add_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ArtifactBody>,
) -> ApiResult {
    let phase = body.phase.as_deref().filter(|phase| !phase.is_empty()).map(parse_phase).transpose()?;
    let id = OpportunityId(id);
    let new = NewArtifact {
        title: body.title,
        content: body.content,
        artifact_type: body.artifact_type,
        phase,
        created_by: body.created_by,
        tags: body.tags,
    };

    let artifact = state.opportunities.add_artifact(&id, new).await?.ok_or(ApiError::ArtifactRejected)?;
    let opportunity = state.opportunities.get(&id).await?;

    info!(
        event_name = "http.artifact.added",
        opportunity_id = %id.0,
        artifact_id = %artifact.id.0,
        phase = %artifact.phase,
        "artifact captured"
    );
    Ok(Json(json!({
        "success": true,
        "artifact": artifact,
        "opportunity": opportunity.map(|opportunity| opportunity.view()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PhaseBody {
    #[serde(default)]
    pub phase: Option<String>,
}

pub async fn change_phase(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PhaseBody>,
) -> ApiResult {
    let raw = body.phase.filter(|phase| !phase.is_empty()).ok_or(ApiError::PhaseRequired)?;
    let id = OpportunityId(id);
    if state.opportunities.get(&id).await?.is_none() {
        return Err(ApiError::OpportunityNotFound);
    }

    let phase = parse_phase(&raw)?;
    let opportunity =
        state.opportunities.move_to_phase(&id, phase).await?.ok_or(ApiError::OpportunityNotFound)?;

    info!(event_name = "http.opportunity.phase_changed", opportunity_id = %id.0, phase = %phase, "phase changed");
    Ok(Json(json!({ "success": true, "opportunity": opportunity.view() })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBody {
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub insight: Option<String>,
}

pub async fn update_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ContextBody>,
) -> ApiResult {
    let opportunity = state
        .opportunities
        .update_context(&OpportunityId(id), body.context_summary, body.insight)
        .await?
        .ok_or(ApiError::OpportunityNotFound)?;
    Ok(Json(json!({ "success": true, "opportunity": opportunity.view() })))
}

pub async fn delete_opportunity(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = OpportunityId(id);
    if !state.opportunities.delete(&id).await? {
        return Err(ApiError::OpportunityNotFound);
    }

    info!(event_name = "http.opportunity.deleted", opportunity_id = %id.0, "opportunity deleted");
    Ok(Json(json!({ "success": true })))
}
