//! Install links from the staging area into the game directories.
//!
//! Symbolic links on Unix. On Windows, junctions for directories, hard links
//! for files on the same volume, and file symlinks (with an elevation
//! fallback) across volumes.

mod creator;
mod error;
mod ops;

pub use creator::{choose_strategy, LinkCreator, LinkStrategy, Platform};
pub use error::LinkError;
pub use ops::{volume_root, LinkOps, SystemLinkOps};
