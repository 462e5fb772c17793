//! Release asset pipeline.
//!
//! Every URL of every asset becomes a runnable download job; every archive
//! asset with at least one URL becomes one gated extract job that is
//! unblocked once all downloads of the release have succeeded.

mod error;
mod jobs;
mod manager;
mod processors;

pub use error::PipelineError;
pub use jobs::{
    DownloadJobData, ExtractJobData, JobTag, DOWNLOAD_PROCESSOR, EXTRACT_PROCESSOR,
};
pub use manager::{ReleaseAssetPipeline, Stage, StageReadiness};
pub use processors::{DownloadProcessor, ExtractProcessor};
