//! Typed job payloads of the release pipeline.

use std::path::PathBuf;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::job::JobRecord;

use super::error::PipelineError;

/// Processor name of download jobs.
pub const DOWNLOAD_PROCESSOR: &str = "download";
/// Processor name of extract jobs.
pub const EXTRACT_PROCESSOR: &str = "extract";

/// Payload of a download job: one URL of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJobData {
    pub release_id: String,
    pub asset_id: String,
    pub url_id: String,
    pub url: String,
    pub target_dir: PathBuf,
}

/// Payload of an extract job: the first part of an archive asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractJobData {
    pub release_id: String,
    pub asset_id: String,
    pub archive_path: PathBuf,
    pub destination: PathBuf,
}

/// The fields every pipeline payload carries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobTag {
    pub release_id: String,
    pub asset_id: String,
}

/// Decodes a job's payload.
pub fn decode<T: DeserializeOwned>(job: &JobRecord) -> Result<T, PipelineError> {
    serde_json::from_value(job.data.clone()).map_err(|e| {
        PipelineError::Serialization(format!("job {} payload: {}", job.job_id, e))
    })
}

pub fn encode<T: Serialize>(data: &T) -> Result<serde_json::Value, PipelineError> {
    serde_json::to_value(data).map_err(|e| PipelineError::Serialization(e.to_string()))
}
