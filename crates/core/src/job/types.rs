//! Job record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Blocked on a dependency, never claimed by a poller.
    Gated,
    /// Eligible and waiting for a poll slot.
    Runnable,
    /// Claimed by a poller, processor executing.
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Returns true if the job can be cancelled from this state.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Gated => "gated",
            JobState::Runnable => "runnable",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Parses the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gated" => Some(JobState::Gated),
            "runnable" => Some(JobState::Runnable),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt at running a processor against a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique per attempt.
    pub run_id: String,
    /// Stable across retries of the same unit of work.
    pub job_id: String,
    pub processor: String,
    pub data: serde_json::Value,
    pub state: JobState,
    /// 1 for the first attempt.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    /// Claims skip the record until this instant has passed.
    pub not_before: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub progress_updated_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Request to insert a new job attempt.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Reuse an existing logical id (retries); a fresh one is generated when None.
    pub job_id: Option<String>,
    pub processor: String,
    pub data: serde_json::Value,
    pub state: JobState,
    pub attempt: u32,
    pub not_before: Option<DateTime<Utc>>,
}

impl NewJob {
    /// First attempt of a new logical job.
    pub fn new(processor: impl Into<String>, data: serde_json::Value, state: JobState) -> Self {
        Self {
            job_id: None,
            processor: processor.into(),
            data,
            state,
            attempt: 1,
            not_before: None,
        }
    }

    /// Next attempt of an existing job, eligible after `not_before`.
    pub fn retry_of(previous: &JobRecord, not_before: DateTime<Utc>) -> Self {
        Self {
            job_id: Some(previous.job_id.clone()),
            processor: previous.processor.clone(),
            data: previous.data.clone(),
            state: JobState::Runnable,
            attempt: previous.attempt + 1,
            not_before: Some(not_before),
        }
    }
}
