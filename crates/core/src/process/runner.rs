//! Child-process runner with progress parsing and cooperative cancellation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use regex_lite::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ToolsConfig;

use super::download::DownloadSpec;
use super::error::{ExitReason, ProcessError};
use super::extract::ExtractSpec;

/// Describes one invocation of an external tool.
pub trait ToolInvocation: Send + Sync {
    /// Short name for logs.
    fn tool_name(&self) -> &str;

    fn executable(&self) -> &Path;

    fn args(&self) -> Vec<String>;

    /// Created before spawning if missing.
    fn target_dir(&self) -> &Path;

    /// What a successful run produced.
    fn artifact_path(&self) -> PathBuf;

    /// Tool-specific percentage pattern. The last match in a segment wins.
    fn progress_pattern(&self) -> &Regex;

    fn describe_exit_code(&self, code: i32) -> ExitReason;
}

/// Successful run of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub artifact: PathBuf,
}

/// Extracts a 0-100 percentage from one output segment.
pub fn parse_percent(pattern: &Regex, segment: &str) -> Option<u8> {
    pattern
        .captures_iter(segment)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u8>().ok())
        .filter(|pct| *pct <= 100)
        .last()
}

/// Tools redraw progress with `\r` or backspaces, so lines alone are not enough.
fn is_segment_break(byte: u8) -> bool {
    matches!(byte, b'\n' | b'\r' | 0x08)
}

/// Runs the download and archive tools.
pub struct ProcessRunner {
    tools: ToolsConfig,
}

impl ProcessRunner {
    /// Creates a new runner with the given tool paths.
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    /// Creates a runner with default tool paths.
    pub fn with_defaults() -> Self {
        Self::new(ToolsConfig::default())
    }

    /// Downloads `url` into `target_dir`, producing `target_dir/<decoded file name>`.
    pub async fn download(
        &self,
        url: &str,
        target_dir: &Path,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<ProcessOutput, ProcessError> {
        let spec = DownloadSpec::new(&self.tools.wget_path, url, target_dir)?;
        Self::run(&spec, cancel, on_progress).await
    }

    /// Extracts `archive` into `destination`.
    pub async fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<ProcessOutput, ProcessError> {
        let spec = ExtractSpec::new(&self.tools.seven_zip_path, archive, destination);
        Self::run(&spec, cancel, on_progress).await
    }

    async fn validate(tool: &dyn ToolInvocation) -> Result<(), ProcessError> {
        let executable = tool.executable();
        let meta = tokio::fs::metadata(executable).await.map_err(|_| {
            ProcessError::props(format!("executable not found: {}", executable.display()))
        })?;
        if meta.is_dir() {
            return Err(ProcessError::props(format!(
                "executable is a directory: {}",
                executable.display()
            )));
        }

        tokio::fs::create_dir_all(tool.target_dir())
            .await
            .map_err(|e| {
                ProcessError::props(format!(
                    "cannot create target directory {}: {}",
                    tool.target_dir().display(),
                    e
                ))
            })?;
        Ok(())
    }

    /// Validates, spawns and supervises one tool invocation.
    pub async fn run(
        tool: &dyn ToolInvocation,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<ProcessOutput, ProcessError> {
        Self::validate(tool).await?;

        let mut child = Command::new(tool.executable())
            .args(tool.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        debug!(
            "Spawned {} ({})",
            tool.tool_name(),
            tool.executable().display()
        );
        on_progress(0);

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

        let mut last_percent = 0u8;
        let mut pending: Vec<u8> = Vec::new();
        let mut buffer = [0u8; 4096];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    debug!("{} cancelled", tool.tool_name());
                    return Err(ProcessError::Cancelled);
                }
                read = stderr.read(&mut buffer) => read?,
            };
            if read == 0 {
                break;
            }

            for &byte in &buffer[..read] {
                if !is_segment_break(byte) {
                    pending.push(byte);
                    continue;
                }
                if pending.is_empty() {
                    continue;
                }
                let segment = String::from_utf8_lossy(&pending);
                if let Some(pct) = parse_percent(tool.progress_pattern(), &segment) {
                    if pct != last_percent {
                        last_percent = pct;
                        on_progress(pct);
                    }
                }
                pending.clear();
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ProcessError::Cancelled);
            }
            status = child.wait() => status?,
        };

        match status.code() {
            Some(0) => {
                on_progress(100);
                Ok(ProcessOutput {
                    artifact: tool.artifact_path(),
                })
            }
            Some(code) => {
                let reason = tool.describe_exit_code(code);
                warn!("{} exited with code {}: {}", tool.tool_name(), code, reason);
                Err(ProcessError::Process { code, reason })
            }
            None => {
                warn!("{} terminated by signal", tool.tool_name());
                Err(ProcessError::Process {
                    code: -1,
                    reason: ExitReason::Unknown,
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Runs a shell snippet as the "tool".
    struct ShellTool {
        executable: PathBuf,
        script: String,
        target_dir: PathBuf,
        pattern: Regex,
    }

    impl ShellTool {
        fn new(script: &str, target_dir: &Path) -> Self {
            Self {
                executable: PathBuf::from("/bin/sh"),
                script: script.to_string(),
                target_dir: target_dir.to_path_buf(),
                pattern: Regex::new(r"(\d{1,3})%").unwrap(),
            }
        }
    }

    impl ToolInvocation for ShellTool {
        fn tool_name(&self) -> &str {
            "sh"
        }
        fn executable(&self) -> &Path {
            &self.executable
        }
        fn args(&self) -> Vec<String> {
            vec!["-c".to_string(), self.script.clone()]
        }
        fn target_dir(&self) -> &Path {
            &self.target_dir
        }
        fn artifact_path(&self) -> PathBuf {
            self.target_dir.join("artifact.bin")
        }
        fn progress_pattern(&self) -> &Regex {
            &self.pattern
        }
        fn describe_exit_code(&self, code: i32) -> ExitReason {
            match code {
                4 => ExitReason::Network,
                _ => ExitReason::Unknown,
            }
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |pct| sink.lock().unwrap().push(pct))
    }

    #[test]
    fn test_parse_percent() {
        let re = Regex::new(r"(\d{1,3})%").unwrap();
        assert_eq!(parse_percent(&re, "  51200K .......... 45% 1.2M 3s"), Some(45));
        assert_eq!(parse_percent(&re, " 12% 3 - file.txt"), Some(12));
        assert_eq!(parse_percent(&re, "Resolving host"), None);
        assert_eq!(parse_percent(&re, "999%"), None);
    }

    #[tokio::test]
    async fn test_success_reports_progress() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("out");
        let tool = ShellTool::new("echo '10%' >&2; printf '50%%\\r' >&2; echo done >&2", &target);
        let (seen, on_progress) = recorder();

        let output = ProcessRunner::run(&tool, &CancellationToken::new(), &on_progress)
            .await
            .unwrap();

        assert_eq!(output.artifact, target.join("artifact.bin"));
        assert!(target.is_dir());
        assert_eq!(*seen.lock().unwrap(), vec![0, 10, 50, 100]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_maps_reason() {
        let temp = TempDir::new().unwrap();
        let tool = ShellTool::new("exit 4", temp.path());
        let (_, on_progress) = recorder();

        let result = ProcessRunner::run(&tool, &CancellationToken::new(), &on_progress).await;
        assert!(matches!(
            result,
            Err(ProcessError::Process {
                code: 4,
                reason: ExitReason::Network
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_is_props_error() {
        let temp = TempDir::new().unwrap();
        let mut tool = ShellTool::new("true", temp.path());
        tool.executable = temp.path().join("no-such-tool");
        let (seen, on_progress) = recorder();

        let result = ProcessRunner::run(&tool, &CancellationToken::new(), &on_progress).await;
        assert!(matches!(result, Err(ProcessError::Props { .. })));
        // Nothing was spawned
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_executable_is_props_error() {
        let temp = TempDir::new().unwrap();
        let mut tool = ShellTool::new("true", temp.path());
        tool.executable = temp.path().to_path_buf();
        let (_, on_progress) = recorder();

        let result = ProcessRunner::run(&tool, &CancellationToken::new(), &on_progress).await;
        assert!(matches!(result, Err(ProcessError::Props { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let temp = TempDir::new().unwrap();
        let tool = ShellTool::new("sleep 30", temp.path());
        let (_, on_progress) = recorder();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            ProcessRunner::run(&tool, &cancel, &on_progress),
        )
        .await
        .expect("cancellation should end the run");
        assert!(matches!(result, Err(ProcessError::Cancelled)));
    }
}
