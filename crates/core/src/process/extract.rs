//! 7-Zip invocation for extracting archives.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;

use super::error::ExitReason;
use super::runner::ToolInvocation;

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // -bsp2 redraws " 45% 12 - Mods/aircraft/A-4E/entry.lua" with backspaces
    RE.get_or_init(|| Regex::new(r"^\s*(\d{1,3})%").expect("valid progress pattern"))
}

/// Maps 7-Zip's documented exit statuses.
pub fn describe_seven_zip_exit_code(code: i32) -> ExitReason {
    match code {
        1 | 2 | 8 => ExitReason::Io,
        7 => ExitReason::Parse,
        _ => ExitReason::Unknown,
    }
}

/// Extraction of one archive (first volume for multi-part sets).
#[derive(Debug, Clone)]
pub struct ExtractSpec {
    executable: PathBuf,
    archive: PathBuf,
    destination: PathBuf,
}

impl ExtractSpec {
    pub fn new(executable: &Path, archive: &Path, destination: &Path) -> Self {
        Self {
            executable: executable.to_path_buf(),
            archive: archive.to_path_buf(),
            destination: destination.to_path_buf(),
        }
    }
}

impl ToolInvocation for ExtractSpec {
    fn tool_name(&self) -> &str {
        "7z"
    }

    fn executable(&self) -> &Path {
        &self.executable
    }

    fn args(&self) -> Vec<String> {
        vec![
            "x".to_string(),
            self.archive.to_string_lossy().to_string(),
            format!("-o{}", self.destination.to_string_lossy()),
            "-y".to_string(),
            "-bso0".to_string(),
            "-bsp2".to_string(),
        ]
    }

    fn target_dir(&self) -> &Path {
        &self.destination
    }

    fn artifact_path(&self) -> PathBuf {
        self.destination.clone()
    }

    fn progress_pattern(&self) -> &Regex {
        progress_regex()
    }

    fn describe_exit_code(&self, code: i32) -> ExitReason {
        describe_seven_zip_exit_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::parse_percent;

    #[test]
    fn test_extract_args() {
        let spec = ExtractSpec::new(
            Path::new("/usr/bin/7z"),
            Path::new("/staging/rel-1/mod.7z.001"),
            Path::new("/staging/rel-1"),
        );
        assert_eq!(
            spec.args(),
            vec![
                "x",
                "/staging/rel-1/mod.7z.001",
                "-o/staging/rel-1",
                "-y",
                "-bso0",
                "-bsp2"
            ]
        );
        assert_eq!(spec.artifact_path(), PathBuf::from("/staging/rel-1"));
    }

    #[test]
    fn test_progress_pattern_anchored() {
        let spec = ExtractSpec::new(Path::new("7z"), Path::new("a.zip"), Path::new("out"));
        assert_eq!(
            parse_percent(spec.progress_pattern(), " 45% 12 - Mods/readme.txt"),
            Some(45)
        );
        // File names that look like percentages are not progress
        assert_eq!(
            parse_percent(spec.progress_pattern(), "Extracting 100%_real.lua"),
            None
        );
    }

    #[test]
    fn test_seven_zip_exit_codes() {
        assert_eq!(describe_seven_zip_exit_code(2), ExitReason::Io);
        assert_eq!(describe_seven_zip_exit_code(7), ExitReason::Parse);
        assert_eq!(describe_seven_zip_exit_code(255), ExitReason::Unknown);
    }
}
