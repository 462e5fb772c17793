use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::release::DestRoot;
use crate::scheduler::{ProcessorOptions, RetryPolicy, SchedulerConfig};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub mission_scripts: MissionScriptConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("dropzone.db")
}

/// Filesystem roots the agent works with.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathsConfig {
    /// Where release assets are downloaded and extracted.
    pub staging_dir: PathBuf,
    /// The game's writable "Saved Games" directory.
    pub dcs_working_dir: PathBuf,
    /// The game's installation directory.
    pub dcs_install_dir: PathBuf,
}

impl PathsConfig {
    /// Absolute directory for one of the two platform roots.
    pub fn root(&self, root: DestRoot) -> &Path {
        match root {
            DestRoot::DcsWorkingDir => &self.dcs_working_dir,
            DestRoot::DcsInstallDir => &self.dcs_install_dir,
        }
    }

    /// Staging directory of a single release.
    pub fn release_staging_dir(&self, release_id: &str) -> PathBuf {
        self.staging_dir.join(release_id)
    }
}

/// External tool executables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_wget_path")]
    pub wget_path: PathBuf,
    #[serde(default = "default_seven_zip_path")]
    pub seven_zip_path: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            wget_path: default_wget_path(),
            seven_zip_path: default_seven_zip_path(),
        }
    }
}

fn default_wget_path() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "wget.exe" } else { "/usr/bin/wget" })
}

fn default_seven_zip_path() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "7za.exe" } else { "/usr/bin/7z" })
}

/// Scheduler section: poll cadence plus per-processor admission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_download_processor")]
    pub download: ProcessorSection,
    #[serde(default = "default_extract_processor")]
    pub extract: ProcessorSection,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            download: default_download_processor(),
            extract: default_extract_processor(),
        }
    }
}

impl SchedulerSection {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_download_processor() -> ProcessorSection {
    ProcessorSection {
        max_concurrent: 1,
        retry_backoff_secs: Some(30),
    }
}

fn default_extract_processor() -> ProcessorSection {
    ProcessorSection {
        max_concurrent: 2,
        retry_backoff_secs: None,
    }
}

/// Admission settings for a single processor.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProcessorSection {
    /// 1 means single-flight.
    pub max_concurrent: usize,
    /// Fixed delay before a failed attempt is retried. None disables retry.
    #[serde(default)]
    pub retry_backoff_secs: Option<u64>,
}

impl ProcessorSection {
    pub fn options(&self) -> ProcessorOptions {
        let retry = match self.retry_backoff_secs {
            Some(secs) => RetryPolicy::FixedBackoff {
                delay: std::time::Duration::from_secs(secs),
            },
            None => RetryPolicy::Never,
        };
        ProcessorOptions {
            max_concurrent: self.max_concurrent,
            retry,
        }
    }
}

/// Where generated loader files go.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MissionScriptConfig {
    /// Relative to the working-dir root.
    #[serde(default = "default_script_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for MissionScriptConfig {
    fn default() -> Self {
        Self {
            output_dir: default_script_output_dir(),
        }
    }
}

fn default_script_output_dir() -> PathBuf {
    PathBuf::from("Scripts").join("DropZone")
}
