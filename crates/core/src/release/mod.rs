//! Releases: the installable versions of mods, their assets, links and scripts.

mod sqlite_store;
mod status;
mod store;
mod types;

pub use sqlite_store::SqliteReleaseStore;
pub use status::{asset_status, mean_progress, release_status};
pub use store::{ReleaseError, ReleaseStore};
pub use types::{
    AssetStatus, AssetUrl, AssetWithStatus, DestRoot, InstalledScript, MissionScript, Release,
    ReleaseAsset, ReleaseStatus, ReleaseWithStatus, RunOn, SymbolicLink,
};
