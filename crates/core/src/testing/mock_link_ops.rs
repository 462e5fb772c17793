//! In-memory filesystem for link tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::link::LinkOps;

/// A recorded filesystem call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Exists(PathBuf),
    StatIsDir(PathBuf),
    EnsureDir(PathBuf),
    Symlink {
        link: PathBuf,
        target: PathBuf,
        is_dir: bool,
    },
    Junction {
        link: PathBuf,
        target: PathBuf,
    },
    HardLink {
        link: PathBuf,
        target: PathBuf,
    },
    ElevatedSymlink {
        link: PathBuf,
        target: PathBuf,
        is_dir: bool,
    },
    Remove(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    File,
    Dir,
    Link(PathBuf),
}

#[derive(Debug)]
struct State {
    entries: HashMap<PathBuf, Entry>,
    calls: Vec<LinkCall>,
    same_volume: bool,
    next_symlink_error: Option<io::ErrorKind>,
    elevation_denied: bool,
    elevations: usize,
    stuck: HashSet<PathBuf>,
}

/// Mock implementation of the LinkOps trait.
///
/// Paths are plain keys; parent directories are never checked.
#[derive(Debug, Clone)]
pub struct MockLinkOps {
    state: Arc<RwLock<State>>,
}

impl Default for MockLinkOps {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLinkOps {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                entries: HashMap::new(),
                calls: Vec::new(),
                same_volume: true,
                next_symlink_error: None,
                elevation_denied: false,
                elevations: 0,
                stuck: HashSet::new(),
            })),
        }
    }

    pub async fn add_file(&self, path: impl AsRef<Path>) {
        self.state
            .write()
            .await
            .entries
            .insert(path.as_ref().to_path_buf(), Entry::File);
    }

    pub async fn add_dir(&self, path: impl AsRef<Path>) {
        self.state
            .write()
            .await
            .entries
            .insert(path.as_ref().to_path_buf(), Entry::Dir);
    }

    /// Answer for every `same_volume` query. Defaults to true.
    pub async fn set_same_volume(&self, same: bool) {
        self.state.write().await.same_volume = same;
    }

    /// Make the next plain symlink call fail with `kind`.
    pub async fn fail_next_symlink(&self, kind: io::ErrorKind) {
        self.state.write().await.next_symlink_error = Some(kind);
    }

    /// Simulate the user declining the elevation prompt.
    pub async fn set_elevation_denied(&self, denied: bool) {
        self.state.write().await.elevation_denied = denied;
    }

    /// Make every removal of `path` fail.
    pub async fn fail_removal(&self, path: impl AsRef<Path>) {
        self.state
            .write()
            .await
            .stuck
            .insert(path.as_ref().to_path_buf());
    }

    pub async fn elevation_count(&self) -> usize {
        self.state.read().await.elevations
    }

    pub async fn calls(&self) -> Vec<LinkCall> {
        self.state.read().await.calls.clone()
    }

    async fn record(&self, call: LinkCall) {
        self.state.write().await.calls.push(call);
    }

    async fn create(&self, link: &Path, target: &Path) -> io::Result<()> {
        let mut state = self.state.write().await;
        if state.entries.contains_key(link) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "entry exists"));
        }
        state
            .entries
            .insert(link.to_path_buf(), Entry::Link(target.to_path_buf()));
        Ok(())
    }
}

#[async_trait]
impl LinkOps for MockLinkOps {
    async fn exists(&self, path: &Path) -> bool {
        self.record(LinkCall::Exists(path.to_path_buf())).await;
        self.state.read().await.entries.contains_key(path)
    }

    async fn stat_is_dir(&self, path: &Path) -> io::Result<bool> {
        self.record(LinkCall::StatIsDir(path.to_path_buf())).await;
        let state = self.state.read().await;
        let mut current = path.to_path_buf();
        // Follow links the way a real stat would
        loop {
            match state.entries.get(&current) {
                Some(Entry::Dir) => return Ok(true),
                Some(Entry::File) => return Ok(false),
                Some(Entry::Link(target)) => current = target.clone(),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} not found", path.display()),
                    ))
                }
            }
        }
    }

    async fn same_volume(&self, _a: &Path, _b: &Path) -> bool {
        self.state.read().await.same_volume
    }

    async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        self.record(LinkCall::EnsureDir(path.to_path_buf())).await;
        Ok(())
    }

    async fn symlink(&self, link: &Path, target: &Path, is_dir: bool) -> io::Result<()> {
        self.record(LinkCall::Symlink {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            is_dir,
        })
        .await;
        if let Some(kind) = self.state.write().await.next_symlink_error.take() {
            return Err(io::Error::new(kind, "symlink refused"));
        }
        self.create(link, target).await
    }

    async fn junction(&self, link: &Path, target: &Path) -> io::Result<()> {
        self.record(LinkCall::Junction {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
        })
        .await;
        self.create(link, target).await
    }

    async fn hard_link(&self, link: &Path, target: &Path) -> io::Result<()> {
        self.record(LinkCall::HardLink {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
        })
        .await;
        self.create(link, target).await
    }

    async fn elevated_symlink(&self, link: &Path, target: &Path, is_dir: bool) -> io::Result<()> {
        self.record(LinkCall::ElevatedSymlink {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            is_dir,
        })
        .await;
        let denied = {
            let mut state = self.state.write().await;
            state.elevations += 1;
            state.elevation_denied
        };
        if denied {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "elevation was declined",
            ));
        }
        self.create(link, target).await
    }

    async fn points_to(&self, link: &Path, target: &Path) -> bool {
        matches!(
            self.state.read().await.entries.get(link),
            Some(Entry::Link(t)) if t == target
        )
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.record(LinkCall::Remove(path.to_path_buf())).await;
        let mut state = self.state.write().await;
        if state.stuck.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is in use",
            ));
        }
        state.entries.remove(path).map(|_| ()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }
}
