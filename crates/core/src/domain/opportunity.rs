use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::short_id;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpportunityId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

/// Consulting engagement phases, in their declared order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityPhase {
    PreAssessment,
    Discovery,
    SolutionDesign,
    Implementation,
}

impl OpportunityPhase {
    pub const ALL: [OpportunityPhase; 4] =
        [Self::PreAssessment, Self::Discovery, Self::SolutionDesign, Self::Implementation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreAssessment => "pre_assessment",
            Self::Discovery => "discovery",
            Self::SolutionDesign => "solution_design",
            Self::Implementation => "implementation",
        }
    }
}

impl fmt::Display for OpportunityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityPhase {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == value.trim())
            .ok_or_else(|| DomainError::InvalidPhase(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OnHold => "on_hold",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OpportunityStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "active" => Ok(Self::Active),
            "on_hold" => Ok(Self::OnHold),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for PhaseStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// Progress record for one phase of one opportunity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    pub phase: OpportunityPhase,
    pub status: PhaseStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub key_activities: Vec<String>,
    pub artifacts_count: u32,
    pub completion_percentage: u8,
}

impl PhaseProgress {
    pub fn new(phase: OpportunityPhase, status: PhaseStatus) -> Self {
        Self {
            phase,
            status,
            start_date: None,
            end_date: None,
            key_activities: Vec::new(),
            artifacts_count: 0,
            completion_percentage: 0,
        }
    }
}

/// A note, document or deliverable captured during a phase. Never edited after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseArtifact {
    pub id: ArtifactId,
    pub title: String,
    pub content: String,
    pub artifact_type: String,
    pub phase: OpportunityPhase,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewArtifact {
    pub title: String,
    pub content: String,
    pub artifact_type: String,
    pub phase: Option<OpportunityPhase>,
    pub created_by: Option<String>,
    pub tags: Vec<String>,
}

impl NewArtifact {
    /// Stamps an id and creation time; `phase` falls back to `current_phase`.
    pub fn into_artifact(self, current_phase: OpportunityPhase) -> PhaseArtifact {
        PhaseArtifact {
            id: ArtifactId(short_id("artifact")),
            title: self.title,
            content: self.content,
            artifact_type: self.artifact_type,
            phase: self.phase.unwrap_or(current_phase),
            created_by: self.created_by,
            created_at: Utc::now(),
            tags: self.tags,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub name: String,
    pub client_name: String,
    pub description: String,
    pub current_phase: OpportunityPhase,
    pub status: OpportunityStatus,
    pub created_at: DateTime<Utc>,
    pub phase_progress: BTreeMap<OpportunityPhase, PhaseProgress>,
    pub artifacts: Vec<PhaseArtifact>,
    pub stakeholders: Vec<String>,
    pub context_summary: String,
    pub key_insights: Vec<String>,
}

/// camelCase mapping returned by the REST API.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityView {
    pub id: String,
    pub name: String,
    pub client_name: String,
    pub description: String,
    pub current_phase: OpportunityPhase,
    pub status: OpportunityStatus,
    pub created_at: DateTime<Utc>,
    pub phase_progress: BTreeMap<OpportunityPhase, PhaseProgress>,
    pub artifacts_count: usize,
    pub stakeholders: Vec<String>,
    pub context_summary: String,
    pub key_insights: Vec<String>,
}

impl Opportunity {
    pub fn new(
        name: impl Into<String>,
        client_name: impl Into<String>,
        description: impl Into<String>,
        stakeholders: Vec<String>,
    ) -> Self {
        let current_phase = OpportunityPhase::PreAssessment;
        Self {
            id: OpportunityId(short_id("opp")),
            name: name.into(),
            client_name: client_name.into(),
            description: description.into(),
            current_phase,
            status: OpportunityStatus::Active,
            created_at: Utc::now(),
            phase_progress: initial_progress(current_phase),
            artifacts: Vec::new(),
            stakeholders,
            context_summary: String::new(),
            key_insights: Vec::new(),
        }
    }

    pub fn progress(&self, phase: OpportunityPhase) -> Option<&PhaseProgress> {
        self.phase_progress.get(&phase)
    }

    pub fn add_artifact(&mut self, new: NewArtifact) -> PhaseArtifact {
        let artifact = new.into_artifact(self.current_phase);
        let phase = artifact.phase;
        self.artifacts.push(artifact.clone());

        if let Some(progress) = self.phase_progress.get_mut(&phase) {
            progress.artifacts_count += 1;
        }

        artifact
    }

    /// Closes the current phase and opens `new_phase`. Phases are not required to be adjacent,
    /// and moving to the current phase re-opens it.
    pub fn move_to_phase(&mut self, new_phase: OpportunityPhase) {
        let now = Utc::now();

        if let Some(progress) = self.phase_progress.get_mut(&self.current_phase) {
            progress.status = PhaseStatus::Completed;
            progress.end_date = Some(now);
            progress.completion_percentage = 100;
        }

        self.current_phase = new_phase;
        if let Some(progress) = self.phase_progress.get_mut(&new_phase) {
            progress.status = PhaseStatus::InProgress;
            progress.start_date = Some(now);
        }
    }

    /// Artifacts for `phase`, or for the current phase when `None`.
    pub fn phase_artifacts(&self, phase: Option<OpportunityPhase>) -> Vec<&PhaseArtifact> {
        let target = phase.unwrap_or(self.current_phase);
        self.artifacts.iter().filter(|artifact| artifact.phase == target).collect()
    }

    /// Returns `false` when the insight was already recorded.
    pub fn add_insight(&mut self, insight: impl Into<String>) -> bool {
        let insight = insight.into();
        if self.key_insights.contains(&insight) {
            return false;
        }
        self.key_insights.push(insight);
        true
    }

    /// Empty strings leave the summary and insights untouched.
    pub fn update_context(&mut self, context_summary: Option<String>, new_insight: Option<String>) {
        if let Some(summary) = context_summary.filter(|summary| !summary.is_empty()) {
            self.context_summary = summary;
        }
        if let Some(insight) = new_insight.filter(|insight| !insight.is_empty()) {
            self.add_insight(insight);
        }
    }

    pub fn view(&self) -> OpportunityView {
        OpportunityView {
            id: self.id.0.clone(),
            name: self.name.clone(),
            client_name: self.client_name.clone(),
            description: self.description.clone(),
            current_phase: self.current_phase,
            status: self.status,
            created_at: self.created_at,
            phase_progress: self.phase_progress.clone(),
            artifacts_count: self.artifacts.len(),
            stakeholders: self.stakeholders.clone(),
            context_summary: self.context_summary.clone(),
            key_insights: self.key_insights.clone(),
        }
    }
}

/// One progress entry per phase; only `starting` begins in progress.
pub fn initial_progress(starting: OpportunityPhase) -> BTreeMap<OpportunityPhase, PhaseProgress> {
    OpportunityPhase::ALL
        .into_iter()
        .map(|phase| {
            let status =
                if phase == starting { PhaseStatus::InProgress } else { PhaseStatus::NotStarted };
            (phase, PhaseProgress::new(phase, status))
        })
        .collect()
}
