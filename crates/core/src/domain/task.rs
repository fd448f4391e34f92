use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::short_id;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// A consulting task. Only `status` changes after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub phase: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId(short_id("task")),
            title: title.into(),
            description: description.into(),
            phase: phase.into(),
            status: TaskStatus::Todo,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskStatus};

    #[test]
    fn new_task_is_todo_and_serializes_camel_case() {
        let task = Task::new("Draft SOW", "Scope and pricing", "discovery");
        let value = serde_json::to_value(&task).expect("serialize");

        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.id.0.starts_with("task_"));
        assert_eq!(value["status"], "todo");
        assert_eq!(value["phase"], "discovery");
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!("IN_PROGRESS".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert!("blocked".parse::<TaskStatus>().is_err());
    }
}
