//! Release toggle implementation.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PathsConfig;
use crate::link::{LinkCreator, LinkError};
use crate::mission_script::{ScriptError, ScriptRebuilder};
use crate::pipeline::{PipelineError, ReleaseAssetPipeline, Stage};
use crate::release::{Release, ReleaseError, ReleaseStore, SymbolicLink};

/// Errors that can occur while enabling or disabling a release.
#[derive(Debug, Error)]
pub enum ToggleError {
    /// Some job of the release has not succeeded yet.
    #[error("Release {release_id} is not ready: {stage} stage is incomplete")]
    NotReady { release_id: String, stage: Stage },

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Release store error: {0}")]
    Release(#[from] ReleaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Mission script error: {0}")]
    Script(#[from] ScriptError),
}

/// Notified after each link of an enabled release is in place.
pub trait LinkObserver: Send + Sync {
    fn on_link_installed(&self, release_id: &str, link: &SymbolicLink, installed_path: &Path);
}

/// Result of a best-effort disable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisableOutcome {
    /// Links whose installed path was cleared.
    pub removed: Vec<String>,
    /// Links that could not be removed and keep their installed path.
    pub failed: Vec<String>,
}

/// Installs and uninstalls releases.
///
/// Calls for the same release must be serialized by the caller.
pub struct ReleaseToggle {
    pipeline: Arc<ReleaseAssetPipeline>,
    links: LinkCreator,
    scripts: Arc<dyn ScriptRebuilder>,
    paths: PathsConfig,
    observer: Option<Arc<dyn LinkObserver>>,
}

impl ReleaseToggle {
    pub fn new(
        pipeline: Arc<ReleaseAssetPipeline>,
        links: LinkCreator,
        scripts: Arc<dyn ScriptRebuilder>,
        paths: PathsConfig,
    ) -> Self {
        Self {
            pipeline,
            links,
            scripts,
            paths,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LinkObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn releases(&self) -> &Arc<dyn ReleaseStore> {
        self.pipeline.releases()
    }

    /// Loads the release and checks that both stages are complete.
    fn ready_release(&self, release_id: &str) -> Result<Release, ToggleError> {
        let release = self
            .releases()
            .get(release_id)?
            .ok_or_else(|| ToggleError::ReleaseNotFound(release_id.to_string()))?;

        if let Some(stage) = self.pipeline.stage_readiness(release_id)?.incomplete_stage() {
            return Err(ToggleError::NotReady {
                release_id: release_id.to_string(),
                stage,
            });
        }
        Ok(release)
    }

    /// Links one file into place unless it already is. Returns whether a
    /// link was created.
    async fn install_link(
        &self,
        release_id: &str,
        staging_dir: &Path,
        link: &SymbolicLink,
    ) -> Result<bool, ToggleError> {
        let source = staging_dir.join(&link.src);
        let destination = self.paths.root(link.dest_root).join(&link.dest);

        let created = if self.links.is_linked(&destination, &source).await {
            debug!("{} already linked", destination.display());
            false
        } else {
            self.links.create_link(&destination, &source).await?;
            true
        };

        self.releases()
            .set_link_installed_path(release_id, &link.id, Some(&destination))?;
        if let Some(observer) = &self.observer {
            observer.on_link_installed(release_id, link, &destination);
        }
        Ok(created)
    }

    /// Recreates missing links of an enabled release without touching the
    /// loaders. Returns how many links were recreated.
    pub async fn restore_links(&self, release_id: &str) -> Result<usize, ToggleError> {
        let release = self.ready_release(release_id)?;
        let staging_dir = self.paths.release_staging_dir(release_id);

        let mut restored = 0;
        for link in &release.links {
            if self.install_link(release_id, &staging_dir, link).await? {
                restored += 1;
            }
        }

        if restored > 0 {
            info!("Restored {} links of release {}", restored, release_id);
        }
        Ok(restored)
    }

    /// Links every file of the release into place and rebuilds the loaders.
    ///
    /// The first link failure aborts the remaining links.
    pub async fn enable(&self, release_id: &str) -> Result<(), ToggleError> {
        let release = self.ready_release(release_id)?;
        let staging_dir = self.paths.release_staging_dir(release_id);

        for link in &release.links {
            self.install_link(release_id, &staging_dir, link).await?;
        }

        for script in &release.scripts {
            let path = self.paths.root(script.root).join(&script.path);
            self.releases()
                .set_script_installed_path(release_id, &script.id, Some(&path))?;
        }

        self.scripts.rebuild().await?;
        info!(
            "Enabled release {} ({} links)",
            release_id,
            release.links.len()
        );
        Ok(())
    }

    /// Removes every installed link of the release, skipping failures, and
    /// rebuilds the loaders.
    pub async fn disable(&self, release_id: &str) -> Result<DisableOutcome, ToggleError> {
        let release = self.ready_release(release_id)?;
        let mut outcome = DisableOutcome::default();

        for link in &release.links {
            let Some(installed) = &link.installed_path else {
                continue;
            };

            match self.links.remove_link(installed).await {
                Ok(()) => {}
                Err(LinkError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{} was already gone", installed.display());
                }
                Err(e) => {
                    warn!(
                        "Failed to remove link {} of release {}: {}",
                        installed.display(),
                        release_id,
                        e
                    );
                    outcome.failed.push(link.id.clone());
                    continue;
                }
            }

            match self
                .releases()
                .set_link_installed_path(release_id, &link.id, None)
            {
                Ok(()) => outcome.removed.push(link.id.clone()),
                Err(e) => {
                    warn!("Failed to clear installed path of link {}: {}", link.id, e);
                    outcome.failed.push(link.id.clone());
                }
            }
        }

        for script in release.scripts.iter().filter(|s| s.installed_path.is_some()) {
            if let Err(e) = self
                .releases()
                .set_script_installed_path(release_id, &script.id, None)
            {
                warn!("Failed to clear installed path of script {}: {}", script.id, e);
            }
        }

        self.scripts.rebuild().await?;
        info!(
            "Disabled release {} ({} removed, {} failed)",
            release_id,
            outcome.removed.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }
}
