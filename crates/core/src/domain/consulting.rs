//! Records captured by the assistant while working an engagement: meeting
//! briefs, process notes, risks and deliverables.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::short_id;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(DomainError::InvalidRiskLevel(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableStatus {
    NotStarted,
    InProgress,
    Review,
    Completed,
}

impl FromStr for DeliverableStatus {
    type Err = DomainError;

    /// Accepts human spellings such as `In Progress`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "completed" => Ok(Self::Completed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingBrief {
    pub id: String,
    pub meeting_title: String,
    pub attendees: Vec<String>,
    pub objective: String,
    pub agenda_items: Vec<String>,
    pub background: String,
    pub key_questions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewMeetingBrief {
    pub meeting_title: String,
    pub attendees: Vec<String>,
    pub objective: String,
    pub agenda_items: Vec<String>,
    pub background: String,
    pub key_questions: Vec<String>,
}

impl MeetingBrief {
    pub fn new(new: NewMeetingBrief) -> Self {
        Self {
            id: short_id("brief"),
            meeting_title: new.meeting_title,
            attendees: new.attendees,
            objective: new.objective,
            agenda_items: new.agenda_items,
            background: new.background,
            key_questions: new.key_questions,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessNote {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub phase: String,
    pub stakeholders: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ProcessNote {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        phase: impl Into<String>,
        stakeholders: Vec<String>,
    ) -> Self {
        Self {
            id: short_id("note"),
            title: title.into(),
            description: description.into(),
            category: category.into(),
            phase: phase.into(),
            stakeholders,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub id: String,
    pub title: String,
    pub description: String,
    pub level: RiskLevel,
    pub impact: String,
    pub mitigation: String,
    pub owner: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRisk {
    pub title: String,
    pub description: String,
    pub level: RiskLevel,
    pub impact: String,
    pub mitigation: String,
    pub owner: Option<String>,
}

impl Risk {
    pub fn new(new: NewRisk) -> Self {
        Self {
            id: short_id("risk"),
            title: new.title,
            description: new.description,
            level: new.level,
            impact: new.impact,
            mitigation: new.mitigation,
            owner: new.owner,
            resolved: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub id: String,
    pub name: String,
    pub description: String,
    pub phase: String,
    pub due_date: Option<String>,
    pub status: DeliverableStatus,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Deliverable {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        phase: impl Into<String>,
        due_date: Option<String>,
        owner: Option<String>,
    ) -> Self {
        Self {
            id: short_id("deliv"),
            name: name.into(),
            description: description.into(),
            phase: phase.into(),
            due_date,
            status: DeliverableStatus::NotStarted,
            owner,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeliverableStatus, RiskLevel};

    #[test]
    fn risk_level_parsing_ignores_case() {
        assert_eq!("High".parse::<RiskLevel>(), Ok(RiskLevel::High));
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn deliverable_status_accepts_spaced_spelling() {
        assert_eq!("In Progress".parse::<DeliverableStatus>(), Ok(DeliverableStatus::InProgress));
        assert_eq!("review".parse::<DeliverableStatus>(), Ok(DeliverableStatus::Review));
    }
}
