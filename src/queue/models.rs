//! Task queue domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    /// Terminal statuses are never left; dependents become ready once all
    /// their dependencies reach one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Conversion from the DB text column to TaskStatus
impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            _ => Err(format!("invalid task status: {}", value)),
        }
    }
}

/// A task to be enqueued.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_type: String,
    pub payload: Option<JsonValue>,
    pub org_id: Option<String>,
    pub repository_uuid: Option<Uuid>,
    pub request_id: Option<String>,
    /// Ids of tasks that must reach a terminal status before this one
    /// becomes claimable. Write-once; edges cannot be changed later.
    pub dependencies: Vec<Uuid>,
}

/// A task row as stored, plus its dependency list.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskInfo {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub task_type: String,
    pub payload: Option<JsonValue>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub error: Option<String>,
    pub org_id: Option<String>,
    pub repository_uuid: Option<Uuid>,
    /// Claim token; set while and only while the task is running.
    pub token: Option<Uuid>,
    pub request_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub dependencies: Vec<Uuid>,
}

impl TaskInfo {
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
