//! Release data model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One of the two game directories a link or script is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestRoot {
    /// Writable "Saved Games" directory.
    DcsWorkingDir,
    /// Game installation directory.
    DcsInstallDir,
}

impl DestRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestRoot::DcsWorkingDir => "dcs_working_dir",
            DestRoot::DcsInstallDir => "dcs_install_dir",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dcs_working_dir" => Some(DestRoot::DcsWorkingDir),
            "dcs_install_dir" => Some(DestRoot::DcsInstallDir),
            _ => None,
        }
    }
}

/// Mission phase a script is loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOn {
    MissionStartBeforeSanitize,
    MissionStartAfterSanitize,
}

impl RunOn {
    pub const ALL: [RunOn; 2] = [
        RunOn::MissionStartBeforeSanitize,
        RunOn::MissionStartAfterSanitize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOn::MissionStartBeforeSanitize => "mission_start_before_sanitize",
            RunOn::MissionStartAfterSanitize => "mission_start_after_sanitize",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mission_start_before_sanitize" => Some(RunOn::MissionStartBeforeSanitize),
            "mission_start_after_sanitize" => Some(RunOn::MissionStartAfterSanitize),
            _ => None,
        }
    }
}

/// A download location of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUrl {
    pub url_id: String,
    pub url: String,
}

/// A downloadable file of a release. Multi-part archives list one URL per part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub id: String,
    pub name: String,
    pub is_archive: bool,
    /// Ordered; the first URL names the archive to extract.
    pub urls: Vec<AssetUrl>,
}

/// A link created on enable and removed on disable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicLink {
    pub id: String,
    pub name: String,
    /// Relative to the release's staging directory.
    pub src: PathBuf,
    /// Relative to `dest_root`.
    pub dest: PathBuf,
    pub dest_root: DestRoot,
    /// Absolute path of the created link while the release is enabled.
    #[serde(default)]
    pub installed_path: Option<PathBuf>,
}

/// A script referenced from a generated loader file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionScript {
    pub id: String,
    pub name: String,
    pub purpose: String,
    /// Relative to `root`.
    pub path: PathBuf,
    pub root: DestRoot,
    pub run_on: RunOn,
    #[serde(default)]
    pub installed_path: Option<PathBuf>,
}

/// One installable version of a mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub release_id: String,
    pub mod_id: String,
    pub mod_name: String,
    pub version: String,
    pub version_hash: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    #[serde(default)]
    pub links: Vec<SymbolicLink>,
    #[serde(default)]
    pub scripts: Vec<MissionScript>,
}

/// A mission script together with the release it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledScript {
    pub release_id: String,
    pub mod_name: String,
    pub version: String,
    pub script: MissionScript,
}

impl InstalledScript {
    /// Stable loader id, `<modName>-<version>`.
    pub fn loader_id(&self) -> String {
        format!("{}-{}", self.mod_name, self.version)
    }
}

/// Aggregated status of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// Aggregated status of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Pending,
    InProgress,
    Error,
    Enabled,
    Disabled,
}

/// An asset with its computed status and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWithStatus {
    pub asset: ReleaseAsset,
    pub status: AssetStatus,
    pub download_progress: f64,
    pub extract_progress: f64,
    /// Mean over download and extract jobs.
    pub progress: f64,
}

/// A release with its computed status and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseWithStatus {
    pub release: Release,
    pub status: ReleaseStatus,
    pub progress: f64,
    pub assets: Vec<AssetWithStatus>,
}
