use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Tool paths are not empty
/// - Poll interval and processor concurrency are non-zero
/// - The two platform roots and the staging dir are distinct
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.tools.wget_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "tools.wget_path cannot be empty".to_string(),
        ));
    }
    if config.tools.seven_zip_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "tools.seven_zip_path cannot be empty".to_string(),
        ));
    }

    if config.scheduler.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    for (name, section) in [
        ("download", &config.scheduler.download),
        ("extract", &config.scheduler.extract),
    ] {
        if section.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.{}.max_concurrent cannot be 0",
                name
            )));
        }
    }

    let paths = &config.paths;
    if paths.dcs_working_dir == paths.dcs_install_dir {
        return Err(ConfigError::ValidationError(
            "paths.dcs_working_dir and paths.dcs_install_dir must differ".to_string(),
        ));
    }
    if paths.staging_dir == paths.dcs_working_dir || paths.staging_dir == paths.dcs_install_dir {
        return Err(ConfigError::ValidationError(
            "paths.staging_dir cannot be one of the game roots".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DatabaseConfig, MissionScriptConfig, PathsConfig, SchedulerSection, ToolsConfig,
    };
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config {
            paths: PathsConfig {
                staging_dir: PathBuf::from("/data/staging"),
                dcs_working_dir: PathBuf::from("/games/saved"),
                dcs_install_dir: PathBuf::from("/games/dcs"),
            },
            database: DatabaseConfig::default(),
            tools: ToolsConfig::default(),
            scheduler: SchedulerSection::default(),
            mission_scripts: MissionScriptConfig::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval_fails() {
        let mut config = valid_config();
        config.scheduler.poll_interval_ms = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = valid_config();
        config.scheduler.extract.max_concurrent = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("scheduler.extract.max_concurrent"));
    }

    #[test]
    fn test_validate_same_roots_fails() {
        let mut config = valid_config();
        config.paths.dcs_install_dir = config.paths.dcs_working_dir.clone();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_staging_inside_root_fails() {
        let mut config = valid_config();
        config.paths.staging_dir = config.paths.dcs_install_dir.clone();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_tool_path_fails() {
        let mut config = valid_config();
        config.tools.seven_zip_path = PathBuf::new();
        assert!(validate_config(&config).is_err());
    }
}
