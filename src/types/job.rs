//! Queue job types: JobStatus, JobPriority, Job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default retry budget for enqueued jobs
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a queue job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    /// Retry budget exhausted — requires retry-dead or purge to leave
    Dead,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Priority lane for queue jobs, scanned highest first
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// All lanes in dequeue scan order
    pub const LANES: [JobPriority; 4] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    /// Lane index into per-lane storage
    pub fn lane_index(&self) -> usize {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of queue-managed work with retry/backoff state
///
/// Invariant: `retry_count <= max_retries` always holds; the transition to
/// `Dead` occurs exactly when a failure arrives with the budget exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    /// Opaque payload; interpreted only by the worker that claims the job
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Ineligible for dequeue until this instant has passed
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: JobPriority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            payload,
            priority,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// Whether the dequeue scan may hand this job to a worker at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.scheduled_for.map_or(true, |at| at <= now)
    }
}
