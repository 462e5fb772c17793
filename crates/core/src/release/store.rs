//! Release storage trait and errors.

use std::path::Path;

use thiserror::Error;

use super::types::{InstalledScript, Release, RunOn};

/// Error type for release store operations.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Release not found.
    #[error("Release not found: {0}")]
    NotFound(String),

    /// A release with this id is already stored.
    #[error("Release already exists: {0}")]
    AlreadyExists(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Durable storage of releases and their assets, links and scripts.
///
/// Links and scripts reference their release by id only.
pub trait ReleaseStore: Send + Sync {
    /// Persist a release with all of its assets, links and scripts atomically.
    fn insert(&self, release: &Release) -> Result<(), ReleaseError>;

    fn get(&self, release_id: &str) -> Result<Option<Release>, ReleaseError>;

    /// All releases, oldest first.
    fn list(&self) -> Result<Vec<Release>, ReleaseError>;

    /// Delete a release and everything it owns.
    fn delete(&self, release_id: &str) -> Result<(), ReleaseError>;

    /// Associate job ids with a release. Existing associations are kept.
    fn add_release_jobs(&self, release_id: &str, job_ids: &[String]) -> Result<(), ReleaseError>;

    /// Job ids associated with a release, in insertion order.
    fn release_job_ids(&self, release_id: &str) -> Result<Vec<String>, ReleaseError>;

    fn clear_release_jobs(&self, release_id: &str) -> Result<(), ReleaseError>;

    fn set_link_installed_path(
        &self,
        release_id: &str,
        link_id: &str,
        installed_path: Option<&Path>,
    ) -> Result<(), ReleaseError>;

    fn set_script_installed_path(
        &self,
        release_id: &str,
        script_id: &str,
        installed_path: Option<&Path>,
    ) -> Result<(), ReleaseError>;

    /// Installed scripts of every release that run in a phase.
    fn installed_scripts(&self, run_on: RunOn) -> Result<Vec<InstalledScript>, ReleaseError>;
}
