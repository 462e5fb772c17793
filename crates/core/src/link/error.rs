//! Error types for the link module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while creating or removing links.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Something already exists at the link path. Links are never overwritten.
    #[error("Link path already exists: {path}")]
    LinkExists { path: PathBuf },

    /// The link target could not be stat'ed.
    #[error("Link target unavailable: {path}")]
    TargetUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to create the link.
    #[error("Failed to link {link} -> {target}: {reason}")]
    LinkCreationFailed {
        link: PathBuf,
        target: PathBuf,
        reason: String,
    },

    /// The elevated fallback was denied or failed.
    #[error("Elevated link creation failed for {link}: {reason}")]
    ElevationFailed { link: PathBuf, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Creates a link creation failed error.
    pub fn creation_failed(link: &std::path::Path, target: &std::path::Path, reason: impl Into<String>) -> Self {
        Self::LinkCreationFailed {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            reason: reason.into(),
        }
    }
}
