//! Error types for the release pipeline.

use thiserror::Error;

use crate::job::JobError;
use crate::release::ReleaseError;
use crate::scheduler::SchedulerError;

/// Errors that can occur in the release asset pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    /// An asset that cannot produce jobs (bad URL).
    #[error("Invalid asset {asset_id}: {reason}")]
    InvalidAsset { asset_id: String, reason: String },

    #[error("Release store error: {0}")]
    Release(#[from] ReleaseError),

    #[error("Job store error: {0}")]
    Job(#[from] JobError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
