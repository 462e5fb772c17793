//! Generated Lua loader files, one per mission phase.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{MissionScriptConfig, PathsConfig};
use crate::release::{DestRoot, ReleaseError, ReleaseStore, RunOn};

/// Errors that can occur while regenerating loader files.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Release store error: {0}")]
    Release(#[from] ReleaseError),

    #[error("Failed to write loader {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Regenerates the loader files after the installed set changed.
#[async_trait]
pub trait ScriptRebuilder: Send + Sync {
    async fn rebuild(&self) -> Result<(), ScriptError>;
}

/// One line of a loader file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderEntry {
    pub id: String,
    pub path: PathBuf,
}

/// File name of the loader of a phase.
pub fn loader_file_name(run_on: RunOn) -> &'static str {
    match run_on {
        RunOn::MissionStartBeforeSanitize => "dropzone_before_sanitize.lua",
        RunOn::MissionStartAfterSanitize => "dropzone_after_sanitize.lua",
    }
}

fn lua_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Renders a loader. An empty entry list still yields a valid file.
pub fn render_loader(run_on: RunOn, entries: &[LoaderEntry]) -> String {
    let mut lua = String::new();
    lua.push_str("-- Generated by dropzone, rewritten on every enable/disable.\n");
    lua.push_str(&format!("-- Phase: {}\n\n", run_on.as_str()));

    lua.push_str("local scripts = {\n");
    for entry in entries {
        lua.push_str(&format!(
            "    {{ id = {}, path = {} }},\n",
            lua_string(&entry.id),
            lua_string(&entry.path.to_string_lossy())
        ));
    }
    lua.push_str("}\n\n");

    lua.push_str(
        "for _, script in ipairs(scripts) do\n\
         \x20   local ok, err = pcall(dofile, script.path)\n\
         \x20   if not ok then\n\
         \x20       env.info(\"[dropzone] \" .. script.id .. \" failed: \" .. tostring(err))\n\
         \x20   end\n\
         end\n",
    );
    lua
}

/// Collects installed mission scripts of all releases into loader files.
pub struct MissionScriptAggregator {
    releases: Arc<dyn ReleaseStore>,
    paths: PathsConfig,
    config: MissionScriptConfig,
}

impl MissionScriptAggregator {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        paths: PathsConfig,
        config: MissionScriptConfig,
    ) -> Self {
        Self {
            releases,
            paths,
            config,
        }
    }

    /// Directory the loaders are written to.
    pub fn output_dir(&self) -> PathBuf {
        self.paths
            .root(DestRoot::DcsWorkingDir)
            .join(&self.config.output_dir)
    }

    pub fn loader_path(&self, run_on: RunOn) -> PathBuf {
        self.output_dir().join(loader_file_name(run_on))
    }

    fn entries(&self, run_on: RunOn) -> Result<Vec<LoaderEntry>, ScriptError> {
        Ok(self
            .releases
            .installed_scripts(run_on)?
            .into_iter()
            .map(|installed| LoaderEntry {
                id: installed.loader_id(),
                path: self.paths.root(installed.script.root).join(&installed.script.path),
            })
            .collect())
    }

    async fn write(path: &Path, contents: String) -> Result<(), ScriptError> {
        let io_err = |source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(path, contents).await.map_err(io_err)
    }
}

#[async_trait]
impl ScriptRebuilder for MissionScriptAggregator {
    /// Rewrites both loaders from the installed scripts only; scripts of
    /// disabled releases have no installed path and are left out.
    async fn rebuild(&self) -> Result<(), ScriptError> {
        for run_on in RunOn::ALL {
            let entries = self.entries(run_on)?;
            let path = self.loader_path(run_on);
            Self::write(&path, render_loader(run_on, &entries)).await?;
            debug!("Wrote {} with {} scripts", path.display(), entries.len());
        }
        info!("Mission script loaders rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ReleaseStore, SqliteReleaseStore};
    use crate::testing::fixtures;
    use tempfile::TempDir;

    #[test]
    fn test_render_empty_loader() {
        let lua = render_loader(RunOn::MissionStartAfterSanitize, &[]);
        assert!(lua.contains("local scripts = {\n}\n"));
        assert!(lua.contains("pcall(dofile, script.path)"));
    }

    #[test]
    fn test_render_escapes_paths() {
        let lua = render_loader(
            RunOn::MissionStartBeforeSanitize,
            &[LoaderEntry {
                id: "A-4E-2.3.0".to_string(),
                path: PathBuf::from(r#"C:\Saved Games\DCS\Scripts\a4e "hooks".lua"#),
            }],
        );
        assert!(lua.contains(
            r#"{ id = "A-4E-2.3.0", path = "C:\\Saved Games\\DCS\\Scripts\\a4e \"hooks\".lua" },"#
        ));
    }

    #[tokio::test]
    async fn test_rebuild_writes_both_loaders() {
        let temp = TempDir::new().unwrap();
        let paths = fixtures::paths(temp.path());
        let releases: Arc<dyn ReleaseStore> = Arc::new(SqliteReleaseStore::in_memory().unwrap());
        let release = fixtures::release("rel-1");
        releases.insert(&release).unwrap();

        let before = &release.scripts[0];
        let installed = paths.dcs_working_dir.join(&before.path);
        releases
            .set_script_installed_path("rel-1", &before.id, Some(installed.as_path()))
            .unwrap();

        let aggregator =
            MissionScriptAggregator::new(Arc::clone(&releases), paths.clone(), MissionScriptConfig::default());
        aggregator.rebuild().await.unwrap();

        let before_lua =
            std::fs::read_to_string(aggregator.loader_path(RunOn::MissionStartBeforeSanitize)).unwrap();
        let expected_id = format!("{}-{}", release.mod_name, release.version);
        assert!(before_lua.contains(&format!("id = \"{}\"", expected_id)));

        // The after-sanitize script is not installed, the loader is still written
        let after_lua =
            std::fs::read_to_string(aggregator.loader_path(RunOn::MissionStartAfterSanitize)).unwrap();
        assert!(after_lua.contains("local scripts = {\n}\n"));

        assert_eq!(
            aggregator.output_dir(),
            paths.dcs_working_dir.join("Scripts").join("DropZone")
        );
    }

    #[tokio::test]
    async fn test_rebuild_leaves_out_uninstalled_scripts() {
        let temp = TempDir::new().unwrap();
        let paths = fixtures::paths(temp.path());
        let releases: Arc<dyn ReleaseStore> = Arc::new(SqliteReleaseStore::in_memory().unwrap());
        let release = fixtures::release("rel-1");
        releases.insert(&release).unwrap();

        let script = &release.scripts[0];
        let installed = paths.dcs_working_dir.join(&script.path);
        releases
            .set_script_installed_path("rel-1", &script.id, Some(installed.as_path()))
            .unwrap();
        let aggregator =
            MissionScriptAggregator::new(Arc::clone(&releases), paths.clone(), MissionScriptConfig::default());
        aggregator.rebuild().await.unwrap();
        let loader = aggregator.loader_path(RunOn::MissionStartBeforeSanitize);
        let expected_id = format!("id = \"{}-{}\"", release.mod_name, release.version);
        assert!(std::fs::read_to_string(&loader).unwrap().contains(&expected_id));

        // Disabling clears the installed path
        releases
            .set_script_installed_path("rel-1", &script.id, None)
            .unwrap();
        aggregator.rebuild().await.unwrap();
        assert!(std::fs::read_to_string(&loader)
            .unwrap()
            .contains("local scripts = {\n}\n"));
    }
}
