//! Mission-script loader generation.
//!
//! Two loader files are always written, one per phase, listing the scripts
//! of every enabled release.

mod aggregator;

pub use aggregator::{
    loader_file_name, render_loader, LoaderEntry, MissionScriptAggregator, ScriptError,
    ScriptRebuilder,
};
