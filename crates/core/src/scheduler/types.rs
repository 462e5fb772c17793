//! Types for the job scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobError, JobRecord, JobState};

/// Errors that can occur while scheduling.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No processor registered under this name.
    #[error("unknown processor: {0}")]
    UnknownProcessor(String),

    /// A processor with this name is already registered.
    #[error("processor already registered: {0}")]
    AlreadyRegistered(String),

    /// Jobs can only be created runnable or gated.
    #[error("invalid initial state: {0}")]
    InvalidInitialState(JobState),

    /// Job store error.
    #[error("job store error: {0}")]
    Job(#[from] JobError),
}

/// Broadcast to subscribers whenever an attempt reaches a terminal state
/// through the scheduler.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Succeeded(JobRecord),
    Failed(JobRecord),
    Cancelled(JobRecord),
}

impl JobEvent {
    pub fn record(&self) -> &JobRecord {
        match self {
            JobEvent::Succeeded(record) | JobEvent::Failed(record) | JobEvent::Cancelled(record) => {
                record
            }
        }
    }
}

/// Snapshot of one registered processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub name: String,
    pub max_concurrent: usize,
    pub active: usize,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub processors: Vec<ProcessorStatus>,
}
