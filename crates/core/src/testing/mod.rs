//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the processor, filesystem and loader seams so the
//! scheduler, link creator and release toggle can be exercised without
//! external tools or a real game directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use dropzone_core::testing::{fixtures, MockLinkOps};
//!
//! let ops = MockLinkOps::new();
//! ops.add_dir("/staging/rel-1/Mods").await;
//!
//! let release = fixtures::release("rel-1");
//! ```

mod mock_link_ops;
mod mock_processor;
mod mock_toggle;

pub use mock_link_ops::{LinkCall, MockLinkOps};
pub use mock_processor::MockProcessor;
pub use mock_toggle::{MockLinkObserver, MockScriptRebuilder};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use crate::config::PathsConfig;
    use crate::release::{
        AssetUrl, DestRoot, MissionScript, Release, ReleaseAsset, RunOn, SymbolicLink,
    };

    /// Staging, working-dir and install-dir roots below `root`.
    pub fn paths(root: &Path) -> PathsConfig {
        PathsConfig {
            staging_dir: root.join("staging"),
            dcs_working_dir: root.join("saved"),
            dcs_install_dir: root.join("dcs"),
        }
    }

    /// An archive asset downloaded from each of `urls`, in order.
    pub fn archive_asset(id: &str, urls: &[&str]) -> ReleaseAsset {
        ReleaseAsset {
            id: id.to_string(),
            name: format!("{} archive", id),
            is_archive: true,
            urls: urls
                .iter()
                .enumerate()
                .map(|(i, url)| AssetUrl {
                    url_id: format!("url-{}", i + 1),
                    url: url.to_string(),
                })
                .collect(),
        }
    }

    /// A plain file asset with a single URL.
    pub fn file_asset(id: &str, url: &str) -> ReleaseAsset {
        ReleaseAsset {
            id: id.to_string(),
            name: format!("{} file", id),
            is_archive: false,
            urls: vec![AssetUrl {
                url_id: "url-1".to_string(),
                url: url.to_string(),
            }],
        }
    }

    /// A link from `src` in staging to `dest` below the working dir.
    pub fn link(id: &str, src: &str, dest: &str) -> SymbolicLink {
        SymbolicLink {
            id: id.to_string(),
            name: src.to_string(),
            src: PathBuf::from(src),
            dest: PathBuf::from(dest),
            dest_root: DestRoot::DcsWorkingDir,
            installed_path: None,
        }
    }

    pub fn script(id: &str, path: &str, run_on: RunOn) -> MissionScript {
        MissionScript {
            id: id.to_string(),
            name: format!("{} script", id),
            purpose: "Adds mission hooks".to_string(),
            path: PathBuf::from(path),
            root: DestRoot::DcsWorkingDir,
            run_on,
            installed_path: None,
        }
    }

    /// A release with the given assets, one link and one script per phase.
    pub fn release_with_assets(id: &str, assets: Vec<ReleaseAsset>) -> Release {
        Release {
            release_id: id.to_string(),
            mod_id: "mod-a4e".to_string(),
            mod_name: "A-4E".to_string(),
            version: "2.3.0".to_string(),
            version_hash: format!("hash-{}", id),
            dependencies: Vec::new(),
            assets,
            links: vec![link("link-1", "A-4E-Community", "Mods/aircraft/A-4E-Community")],
            scripts: vec![
                script(
                    "script-1",
                    "Scripts/A-4E/before.lua",
                    RunOn::MissionStartBeforeSanitize,
                ),
                script(
                    "script-2",
                    "Scripts/A-4E/after.lua",
                    RunOn::MissionStartAfterSanitize,
                ),
            ],
        }
    }

    /// A release with a single one-part archive asset.
    pub fn release(id: &str) -> Release {
        release_with_assets(
            id,
            vec![archive_asset(
                "asset-1",
                &[&format!("https://example.com/files/{}.zip", id)],
            )],
        )
    }
}
