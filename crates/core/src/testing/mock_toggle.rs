//! Mocks for the collaborators of the release toggle.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::mission_script::{ScriptError, ScriptRebuilder};
use crate::release::SymbolicLink;
use crate::toggle::LinkObserver;

/// Counts loader rebuilds.
#[derive(Debug, Clone, Default)]
pub struct MockScriptRebuilder {
    count: Arc<RwLock<usize>>,
    fail_path: Arc<RwLock<Option<PathBuf>>>,
}

impl MockScriptRebuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every rebuild fail as if `path` could not be written.
    pub async fn fail_with_path(&self, path: impl Into<PathBuf>) {
        *self.fail_path.write().await = Some(path.into());
    }

    pub async fn rebuild_count(&self) -> usize {
        *self.count.read().await
    }
}

#[async_trait]
impl ScriptRebuilder for MockScriptRebuilder {
    async fn rebuild(&self) -> Result<(), ScriptError> {
        *self.count.write().await += 1;
        match self.fail_path.read().await.clone() {
            Some(path) => Err(ScriptError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            }),
            None => Ok(()),
        }
    }
}

/// Records `(release_id, link_id, installed_path)` notifications.
#[derive(Debug, Clone, Default)]
pub struct MockLinkObserver {
    installed: Arc<Mutex<Vec<(String, String, PathBuf)>>>,
}

impl MockLinkObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed(&self) -> Vec<(String, String, PathBuf)> {
        self.installed.lock().unwrap().clone()
    }
}

impl LinkObserver for MockLinkObserver {
    fn on_link_installed(&self, release_id: &str, link: &SymbolicLink, installed_path: &Path) {
        self.installed.lock().unwrap().push((
            release_id.to_string(),
            link.id.clone(),
            installed_path.to_path_buf(),
        ));
    }
}
