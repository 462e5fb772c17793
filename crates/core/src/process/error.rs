//! Error types for the process module.

use std::fmt;

use thiserror::Error;

/// Short human-readable reason derived from a tool's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Io,
    Network,
    Protocol,
    Auth,
    Server,
    Parse,
    Unknown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ExitReason::Io => "I/O error",
            ExitReason::Network => "network failure",
            ExitReason::Protocol => "protocol error",
            ExitReason::Auth => "authentication failure",
            ExitReason::Server => "server error response",
            ExitReason::Parse => "parse error",
            ExitReason::Unknown => "unknown error",
        };
        f.write_str(reason)
    }
}

/// Errors that can occur while running an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Invalid input; no process was spawned.
    #[error("Invalid process input: {reason}")]
    Props { reason: String },

    /// The tool exited with a non-zero code.
    #[error("Process exited with code {code}: {reason}")]
    Process { code: i32, reason: ExitReason },

    /// The cancellation token fired and the process was killed.
    #[error("Process cancelled")]
    Cancelled,

    /// I/O error while talking to the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Creates a new props error.
    pub fn props(reason: impl Into<String>) -> Self {
        Self::Props {
            reason: reason.into(),
        }
    }

    /// Short code persisted with failed jobs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Props { .. } => "PROPS_ERROR",
            Self::Process { .. } => "PROCESS_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Process { .. } | Self::Io(_))
    }
}
