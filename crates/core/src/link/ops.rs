//! Filesystem operations behind link creation.

use std::io;
use std::path::{Component, Path};

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Raw OS link operations. None of them check for existing paths.
#[async_trait]
pub trait LinkOps: Send + Sync {
    /// Whether anything (including a dangling link) exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Follows links.
    async fn stat_is_dir(&self, path: &Path) -> io::Result<bool>;

    /// Whether both paths live under the same volume root.
    async fn same_volume(&self, a: &Path, b: &Path) -> bool;

    async fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    async fn symlink(&self, link: &Path, target: &Path, is_dir: bool) -> io::Result<()>;

    async fn junction(&self, link: &Path, target: &Path) -> io::Result<()>;

    async fn hard_link(&self, link: &Path, target: &Path) -> io::Result<()>;

    /// Same as `symlink`, run through an elevation prompt.
    async fn elevated_symlink(&self, link: &Path, target: &Path, is_dir: bool) -> io::Result<()>;

    /// Whether `link` resolves to the same file or directory as `target`.
    async fn points_to(&self, link: &Path, target: &Path) -> bool;

    /// Removes the link itself, never what it points to.
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Volume prefix (`C:`, `\\server\share`) of an absolute Windows path.
pub fn volume_root(path: &Path) -> Option<String> {
    match path.components().next() {
        Some(Component::Prefix(prefix)) => {
            Some(prefix.as_os_str().to_string_lossy().to_ascii_lowercase())
        }
        _ => None,
    }
}

async fn run_command(command: &mut Command) -> io::Result<()> {
    let output = command.output().await?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(io::Error::other(format!(
            "{} ({})",
            detail.trim(),
            output.status
        )))
    }
}

/// PowerShell literal string quoting.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Real filesystem implementation.
#[derive(Debug, Clone, Default)]
pub struct SystemLinkOps;

impl SystemLinkOps {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LinkOps for SystemLinkOps {
    async fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).await.is_ok()
    }

    async fn stat_is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(fs::metadata(path).await?.is_dir())
    }

    async fn same_volume(&self, a: &Path, b: &Path) -> bool {
        volume_root(a) == volume_root(b)
    }

    async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    #[cfg(unix)]
    async fn symlink(&self, link: &Path, target: &Path, _is_dir: bool) -> io::Result<()> {
        fs::symlink(target, link).await
    }

    #[cfg(windows)]
    async fn symlink(&self, link: &Path, target: &Path, is_dir: bool) -> io::Result<()> {
        if is_dir {
            fs::symlink_dir(target, link).await
        } else {
            fs::symlink_file(target, link).await
        }
    }

    async fn junction(&self, link: &Path, target: &Path) -> io::Result<()> {
        if !cfg!(windows) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "junctions exist only on Windows",
            ));
        }
        debug!("mklink /J {} {}", link.display(), target.display());
        run_command(Command::new("cmd").arg("/C").arg("mklink").arg("/J").arg(link).arg(target))
            .await
    }

    async fn hard_link(&self, link: &Path, target: &Path) -> io::Result<()> {
        fs::hard_link(target, link).await
    }

    async fn elevated_symlink(&self, link: &Path, target: &Path, is_dir: bool) -> io::Result<()> {
        if !cfg!(windows) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "elevation prompt exists only on Windows",
            ));
        }

        let mklink = format!(
            "/c mklink {}\"{}\" \"{}\"",
            if is_dir { "/D " } else { "" },
            link.display(),
            target.display()
        );
        let script = format!(
            "Start-Process -FilePath cmd -ArgumentList {} -Verb RunAs -Wait -WindowStyle Hidden",
            ps_quote(&mklink)
        );
        debug!("Requesting elevation for {}", link.display());
        run_command(
            Command::new("powershell")
                .arg("-NoProfile")
                .arg("-NonInteractive")
                .arg("-Command")
                .arg(script),
        )
        .await?;

        // The elevated cmd's exit code is not propagated through Start-Process
        if fs::symlink_metadata(link).await.is_ok() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "elevated mklink did not create the link",
            ))
        }
    }

    async fn points_to(&self, link: &Path, target: &Path) -> bool {
        let (Ok(link_meta), Ok(target_meta)) = (fs::metadata(link).await, fs::metadata(target).await)
        else {
            return false;
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            link_meta.dev() == target_meta.dev() && link_meta.ino() == target_meta.ino()
        }

        #[cfg(not(unix))]
        {
            if let (Ok(a), Ok(b)) = (fs::canonicalize(link).await, fs::canonicalize(target).await) {
                if a == b {
                    return true;
                }
            }
            // Hard links share one file record
            link_meta.is_file()
                && target_meta.is_file()
                && link_meta.len() == target_meta.len()
                && link_meta.modified().ok() == target_meta.modified().ok()
                && link_meta.created().ok() == target_meta.created().ok()
        }
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path).await?;

        #[cfg(windows)]
        let is_dir_entry = {
            use std::os::windows::fs::MetadataExt;
            const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
            meta.file_attributes() & FILE_ATTRIBUTE_DIRECTORY != 0
        };
        #[cfg(not(windows))]
        let is_dir_entry = meta.is_dir();

        if is_dir_entry {
            // Junctions and directory symlinks; a real non-empty directory fails here
            fs::remove_dir(path).await
        } else {
            fs::remove_file(path).await
        }
    }
}
