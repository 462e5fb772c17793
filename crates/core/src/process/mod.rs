//! External tool runner (wget downloads, 7-Zip extraction).
//!
//! Inputs are validated before anything is spawned, progress is parsed from
//! the tool's stderr, and a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! kills the child cooperatively.

mod download;
mod error;
mod extract;
mod runner;

pub use download::{describe_wget_exit_code, file_name_from_url, DownloadSpec};
pub use error::{ExitReason, ProcessError};
pub use extract::{describe_seven_zip_exit_code, ExtractSpec};
pub use runner::{parse_percent, ProcessOutput, ProcessRunner, ToolInvocation};
