//! Cross-platform link creation.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::LinkError;
use super::ops::LinkOps;

/// Operating system family, as far as links are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// How a link will be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStrategy {
    /// Plain symbolic link of the given kind.
    Symlink { is_dir: bool },
    /// Windows directory junction.
    Junction,
    /// Hard link on the same volume; needs no privileges.
    HardLink,
    /// File symlink across volumes, with an elevation prompt if refused.
    SymlinkWithElevation,
}

/// Picks the link kind for a target.
pub fn choose_strategy(platform: Platform, is_dir: bool, same_volume: bool) -> LinkStrategy {
    match (platform, is_dir, same_volume) {
        (Platform::Unix, is_dir, _) => LinkStrategy::Symlink { is_dir },
        (Platform::Windows, true, _) => LinkStrategy::Junction,
        (Platform::Windows, false, true) => LinkStrategy::HardLink,
        (Platform::Windows, false, false) => LinkStrategy::SymlinkWithElevation,
    }
}

/// Unprivileged symlinks fail with ERROR_PRIVILEGE_NOT_HELD on Windows.
fn is_permission_denied(error: &std::io::Error) -> bool {
    const ERROR_PRIVILEGE_NOT_HELD: i32 = 1314;
    error.kind() == std::io::ErrorKind::PermissionDenied
        || error.raw_os_error() == Some(ERROR_PRIVILEGE_NOT_HELD)
}

/// Creates and removes install links.
pub struct LinkCreator {
    ops: Arc<dyn LinkOps>,
    platform: Platform,
}

impl LinkCreator {
    /// Creates a link creator for the current platform.
    pub fn new(ops: Arc<dyn LinkOps>) -> Self {
        Self::with_platform(ops, Platform::current())
    }

    /// Creates a link creator that follows another platform's rules.
    pub fn with_platform(ops: Arc<dyn LinkOps>, platform: Platform) -> Self {
        Self { ops, platform }
    }

    pub fn ops(&self) -> &Arc<dyn LinkOps> {
        &self.ops
    }

    /// Creates `link` pointing at `target`. Never overwrites an existing path.
    pub async fn create_link(&self, link: &Path, target: &Path) -> Result<LinkStrategy, LinkError> {
        if self.ops.exists(link).await {
            return Err(LinkError::LinkExists {
                path: link.to_path_buf(),
            });
        }

        let is_dir = self
            .ops
            .stat_is_dir(target)
            .await
            .map_err(|source| LinkError::TargetUnavailable {
                path: target.to_path_buf(),
                source,
            })?;

        if let Some(parent) = link.parent() {
            self.ops.ensure_dir(parent).await?;
        }

        let same_volume = self.ops.same_volume(link, target).await;
        let strategy = choose_strategy(self.platform, is_dir, same_volume);
        debug!(
            "Linking {} -> {} as {:?}",
            link.display(),
            target.display(),
            strategy
        );

        let created = match strategy {
            LinkStrategy::Symlink { is_dir } => self.ops.symlink(link, target, is_dir).await,
            LinkStrategy::Junction => self.ops.junction(link, target).await,
            LinkStrategy::HardLink => self.ops.hard_link(link, target).await,
            LinkStrategy::SymlinkWithElevation => {
                match self.ops.symlink(link, target, false).await {
                    Err(e) if is_permission_denied(&e) => {
                        warn!(
                            "Symlink {} refused ({}), requesting elevation",
                            link.display(),
                            e
                        );
                        return self
                            .ops
                            .elevated_symlink(link, target, false)
                            .await
                            .map(|()| strategy)
                            .map_err(|e| LinkError::ElevationFailed {
                                link: link.to_path_buf(),
                                reason: e.to_string(),
                            });
                    }
                    other => other,
                }
            }
        };

        created.map_err(|e| LinkError::creation_failed(link, target, e.to_string()))?;
        info!("Linked {} -> {}", link.display(), target.display());
        Ok(strategy)
    }

    /// Whether `link` already resolves to `target`.
    pub async fn is_linked(&self, link: &Path, target: &Path) -> bool {
        self.ops.exists(link).await && self.ops.points_to(link, target).await
    }

    /// Removes a link without touching what it points to.
    pub async fn remove_link(&self, link: &Path) -> Result<(), LinkError> {
        self.ops.remove(link).await?;
        info!("Removed link {}", link.display());
        Ok(())
    }
}
