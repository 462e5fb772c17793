//! The processor seam: named units of work the scheduler executes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::job::{JobRecord, JobStore};

/// Why a processor could not finish a job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProcessorFailure {
    /// Short machine-readable code, persisted as the job's error code.
    pub code: String,
    pub message: String,
    /// Whether a retry policy may schedule another attempt.
    pub retryable: bool,
}

impl ProcessorFailure {
    /// A failure no retry can fix (bad input, bad config).
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// A failure worth another attempt.
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: true,
        }
    }
}

/// Persists progress for one running attempt.
#[derive(Clone)]
pub struct ProgressReporter {
    run_id: String,
    store: Arc<dyn JobStore>,
}

impl ProgressReporter {
    pub fn new(run_id: impl Into<String>, store: Arc<dyn JobStore>) -> Self {
        Self {
            run_id: run_id.into(),
            store,
        }
    }

    /// Record a percentage. Failures are logged, never propagated.
    pub fn report(&self, percent: u8) {
        if let Err(e) = self.store.update_progress(&self.run_id, percent) {
            warn!("Failed to record progress for run {}: {}", self.run_id, e);
        }
    }
}

/// Everything a processor gets besides the job itself.
#[derive(Clone)]
pub struct ProcessorContext {
    pub run_id: String,
    pub progress: ProgressReporter,
    /// Cancelled when the job is cancelled or the scheduler stops.
    pub cancel: CancellationToken,
}

impl ProcessorContext {
    pub fn new(run_id: impl Into<String>, store: Arc<dyn JobStore>, cancel: CancellationToken) -> Self {
        let run_id = run_id.into();
        Self {
            progress: ProgressReporter::new(run_id.clone(), store),
            run_id,
            cancel,
        }
    }
}

/// A named unit of work logic pluggable into the scheduler.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Name jobs are tagged with.
    fn name(&self) -> &str;

    /// Run one attempt, returning the result payload on success.
    async fn process(
        &self,
        job: &JobRecord,
        ctx: ProcessorContext,
    ) -> Result<serde_json::Value, ProcessorFailure>;
}
