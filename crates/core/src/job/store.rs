//! Job record storage trait and types.

use thiserror::Error;

use super::{JobRecord, JobState, NewJob};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job record not found.
    #[error("Job run not found: {0}")]
    NotFound(String),

    /// Cannot perform operation due to current state.
    #[error("Cannot {operation} job run {run_id}: current state is {current_state}")]
    InvalidState {
        run_id: String,
        current_state: JobState,
        operation: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Payload (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying job records by state.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Match any of these states. Empty matches all.
    pub states: Vec<JobState>,
    /// Restrict to one processor.
    pub processor: Option<String>,
    /// Maximum number of results.
    pub limit: Option<i64>,
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by states.
    pub fn with_states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    /// Filter by processor.
    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Trait for job record storage backends.
///
/// Records are never deleted by normal operation; `purge` exists only for
/// release deletion.
pub trait JobStore: Send + Sync {
    /// Insert a new attempt.
    fn add(&self, job: NewJob) -> Result<JobRecord, JobError>;

    /// Get an attempt by run id.
    fn get(&self, run_id: &str) -> Result<Option<JobRecord>, JobError>;

    /// All attempts for a logical job, oldest first.
    fn attempts(&self, job_id: &str) -> Result<Vec<JobRecord>, JobError>;

    /// Most recent attempt for a logical job.
    fn latest(&self, job_id: &str) -> Result<Option<JobRecord>, JobError>;

    /// Most recent attempt of each of the given logical jobs.
    fn latest_for_jobs(&self, job_ids: &[String]) -> Result<Vec<JobRecord>, JobError>;

    /// All records of a processor, oldest first.
    fn by_processor(&self, processor: &str) -> Result<Vec<JobRecord>, JobError>;

    /// Records in any of the filter's states, oldest first.
    fn by_states(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobError>;

    /// Atomically select the oldest eligible `Runnable` record of a processor
    /// and flip it to `Running`.
    fn claim_next(&self, processor: &str) -> Result<Option<JobRecord>, JobError>;

    /// Flip a `Gated` record to `Runnable`.
    fn unblock(&self, run_id: &str) -> Result<JobRecord, JobError>;

    /// Record progress (0-100) for a running attempt.
    fn update_progress(&self, run_id: &str, progress: u8) -> Result<(), JobError>;

    /// Mark a running attempt `Succeeded` with its result and 100% progress.
    fn complete(&self, run_id: &str, result: serde_json::Value) -> Result<JobRecord, JobError>;

    /// Mark a running attempt `Failed`.
    fn fail(&self, run_id: &str, code: &str, message: &str) -> Result<JobRecord, JobError>;

    /// Mark a non-terminal attempt `Cancelled`.
    fn cancel(&self, run_id: &str) -> Result<JobRecord, JobError>;

    /// Return orphaned `Running` records of a processor to `Runnable`.
    fn requeue_running(&self, processor: &str) -> Result<usize, JobError>;

    /// Logical job ids whose payload has `field` set to `value`.
    fn job_ids_by_data(&self, field: &str, value: &str) -> Result<Vec<String>, JobError>;

    /// Delete every attempt of the given logical jobs.
    fn purge(&self, job_ids: &[String]) -> Result<usize, JobError>;
}
