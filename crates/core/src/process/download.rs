//! wget invocation for downloading release assets.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;

use super::error::{ExitReason, ProcessError};
use super::runner::ToolInvocation;

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // wget --progress=dot lines: "  51200K .......... .......... 45% 1.21M 3s"
    RE.get_or_init(|| Regex::new(r"(\d{1,3})%").expect("valid progress pattern"))
}

/// Decoded file name of the last path segment of an http(s) URL.
pub fn file_name_from_url(url: &str) -> Result<String, ProcessError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ProcessError::props(format!("unsupported URL: {}", url)))?;

    let path = rest.split(['?', '#']).next().unwrap_or_default();
    let (host, path) = path.split_once('/').unwrap_or((path, ""));
    if host.is_empty() {
        return Err(ProcessError::props(format!("URL has no host: {}", url)));
    }

    let segment = path.rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map_err(|e| ProcessError::props(format!("cannot decode file name of {}: {}", url, e)))?;

    if decoded.is_empty() || decoded == "." || decoded == ".." || decoded.contains(['/', '\\']) {
        return Err(ProcessError::props(format!(
            "URL has no usable file name: {}",
            url
        )));
    }
    Ok(decoded.into_owned())
}

/// Maps wget's documented exit statuses.
pub fn describe_wget_exit_code(code: i32) -> ExitReason {
    match code {
        2 => ExitReason::Parse,
        3 => ExitReason::Io,
        4 => ExitReason::Network,
        5 | 7 => ExitReason::Protocol,
        6 => ExitReason::Auth,
        8 => ExitReason::Server,
        _ => ExitReason::Unknown,
    }
}

/// One download of a single URL into a directory.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    executable: PathBuf,
    url: String,
    target_dir: PathBuf,
    file_name: String,
}

impl DownloadSpec {
    /// Validates the URL up front so a bad one never reaches the tool.
    pub fn new(executable: &Path, url: &str, target_dir: &Path) -> Result<Self, ProcessError> {
        let file_name = file_name_from_url(url)?;
        Ok(Self {
            executable: executable.to_path_buf(),
            url: url.to_string(),
            target_dir: target_dir.to_path_buf(),
            file_name,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl ToolInvocation for DownloadSpec {
    fn tool_name(&self) -> &str {
        "wget"
    }

    fn executable(&self) -> &Path {
        &self.executable
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--tries=1".to_string(),
            "--continue".to_string(),
            "--progress=dot:mega".to_string(),
            "-O".to_string(),
            self.artifact_path().to_string_lossy().to_string(),
            self.url.clone(),
        ]
    }

    fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    fn artifact_path(&self) -> PathBuf {
        self.target_dir.join(&self.file_name)
    }

    fn progress_pattern(&self) -> &Regex {
        progress_regex()
    }

    fn describe_exit_code(&self, code: i32) -> ExitReason {
        describe_wget_exit_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_decoded() {
        assert_eq!(
            file_name_from_url("https://cdn.example.com/mods/A-4E%20Skyhawk%202.3.zip").unwrap(),
            "A-4E Skyhawk 2.3.zip"
        );
    }

    #[test]
    fn test_file_name_ignores_query_and_fragment() {
        assert_eq!(
            file_name_from_url("http://example.com/dl/pack.7z.001?token=abc#x").unwrap(),
            "pack.7z.001"
        );
    }

    #[test]
    fn test_file_name_rejects_bad_urls() {
        assert!(matches!(
            file_name_from_url("ftp://example.com/a.zip"),
            Err(ProcessError::Props { .. })
        ));
        assert!(file_name_from_url("https://example.com/").is_err());
        assert!(file_name_from_url("https://example.com").is_err());
        assert!(file_name_from_url("https:///a.zip").is_err());
        assert!(file_name_from_url("https://example.com/a%2Fb").is_err());
    }

    #[test]
    fn test_wget_exit_codes() {
        assert_eq!(describe_wget_exit_code(3), ExitReason::Io);
        assert_eq!(describe_wget_exit_code(4), ExitReason::Network);
        assert_eq!(describe_wget_exit_code(5), ExitReason::Protocol);
        assert_eq!(describe_wget_exit_code(6), ExitReason::Auth);
        assert_eq!(describe_wget_exit_code(8), ExitReason::Server);
        assert_eq!(describe_wget_exit_code(2), ExitReason::Parse);
        assert_eq!(describe_wget_exit_code(1), ExitReason::Unknown);
    }

    #[test]
    fn test_download_args() {
        let spec = DownloadSpec::new(
            Path::new("/usr/bin/wget"),
            "https://example.com/files/mod.zip",
            Path::new("/staging/rel-1"),
        )
        .unwrap();

        assert_eq!(spec.file_name(), "mod.zip");
        assert_eq!(spec.artifact_path(), PathBuf::from("/staging/rel-1/mod.zip"));
        let args = spec.args();
        assert_eq!(args.last().unwrap(), "https://example.com/files/mod.zip");
        assert!(args.contains(&"-O".to_string()));
        assert!(args.contains(&"/staging/rel-1/mod.zip".to_string()));
    }
}
