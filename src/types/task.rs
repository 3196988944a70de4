//! Coordinator task types: TaskStatus, TaskPriority, Task

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a coordinator task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the backlog for an agent
    #[default]
    Pending,
    /// Assigned to exactly one busy agent
    Running,
    Completed,
    Failed,
    /// Failed with retry requested — back in the backlog, unassigned
    Retrying,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states are eligible for retention purge
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Submission priority for tasks
///
/// `Critical` and `High` submissions are inserted at the backlog front;
/// everything else goes to the back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Whether a submission with this priority jumps the backlog
    pub fn is_urgent(&self) -> bool {
        matches!(self, TaskPriority::Critical | TaskPriority::High)
    }
}

/// A unit of coordinator-managed work, assigned to at most one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Empty when unassigned
    pub agent_id: Option<String>,
    pub task_type: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Opaque input payload; the scheduling core never interprets it
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_task_id: Option<String>,
}

impl Task {
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        input: serde_json::Value,
        priority: TaskPriority,
        parent_task_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: None,
            task_type: task_type.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            input,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            parent_task_id,
        }
    }

    /// Whether the backlog scan may hand this task to an agent
    pub fn is_claimable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Retrying)
    }
}
