//! Scheduler processors backed by the external tool runner.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::error;

use crate::job::JobRecord;
use crate::process::{ProcessError, ProcessRunner};
use crate::scheduler::{Processor, ProcessorContext, ProcessorFailure};

use super::error::PipelineError;
use super::jobs::{decode, DownloadJobData, ExtractJobData, DOWNLOAD_PROCESSOR, EXTRACT_PROCESSOR};

impl From<ProcessError> for ProcessorFailure {
    fn from(error: ProcessError) -> Self {
        ProcessorFailure {
            code: error.code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

fn invalid_payload(job: &JobRecord) -> impl FnOnce(PipelineError) -> ProcessorFailure + '_ {
    move |e| {
        error!("Rejecting job {}: {}", job.job_id, e);
        ProcessorFailure::fatal("INVALID_JOB_DATA", e.to_string())
    }
}

/// Downloads one asset URL into the release's staging directory.
pub struct DownloadProcessor {
    runner: Arc<ProcessRunner>,
}

impl DownloadProcessor {
    pub fn new(runner: Arc<ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Processor for DownloadProcessor {
    fn name(&self) -> &str {
        DOWNLOAD_PROCESSOR
    }

    async fn process(
        &self,
        job: &JobRecord,
        ctx: ProcessorContext,
    ) -> Result<serde_json::Value, ProcessorFailure> {
        let data: DownloadJobData = decode(job).map_err(invalid_payload(job))?;
        let progress = ctx.progress.clone();

        let output = self
            .runner
            .download(&data.url, &data.target_dir, &ctx.cancel, &move |pct| {
                progress.report(pct)
            })
            .await?;

        Ok(json!({ "path": output.artifact }))
    }
}

/// Extracts an archive asset in place.
pub struct ExtractProcessor {
    runner: Arc<ProcessRunner>,
}

impl ExtractProcessor {
    pub fn new(runner: Arc<ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Processor for ExtractProcessor {
    fn name(&self) -> &str {
        EXTRACT_PROCESSOR
    }

    async fn process(
        &self,
        job: &JobRecord,
        ctx: ProcessorContext,
    ) -> Result<serde_json::Value, ProcessorFailure> {
        let data: ExtractJobData = decode(job).map_err(invalid_payload(job))?;
        let progress = ctx.progress.clone();

        let output = self
            .runner
            .extract(&data.archive_path, &data.destination, &ctx.cancel, &move |pct| {
                progress.report(pct)
            })
            .await?;

        Ok(json!({ "path": output.artifact }))
    }
}
