//! Status aggregation from job states.

use crate::job::JobState;

use super::types::{AssetStatus, ReleaseStatus, SymbolicLink};

/// Nothing has started yet: waiting on a dependency or on a poll slot.
fn is_not_started(state: &JobState) -> bool {
    matches!(state, JobState::Gated | JobState::Runnable)
}

/// Status of one asset from the latest attempts of its download and extract jobs.
pub fn asset_status(download: &[JobState], extract: &[JobState]) -> AssetStatus {
    let mut states = download.iter().chain(extract);

    if states.clone().any(|s| *s == JobState::Failed) {
        AssetStatus::Error
    } else if states.clone().all(is_not_started) {
        AssetStatus::Pending
    } else if states.all(|s| *s == JobState::Succeeded) {
        AssetStatus::Completed
    } else {
        AssetStatus::InProgress
    }
}

/// Status of a release from its asset statuses and link records.
pub fn release_status(assets: &[AssetStatus], links: &[SymbolicLink]) -> ReleaseStatus {
    if assets.iter().all(|s| *s == AssetStatus::Pending) {
        ReleaseStatus::Pending
    } else if assets.contains(&AssetStatus::Error) {
        ReleaseStatus::Error
    } else if assets.iter().all(|s| *s == AssetStatus::Completed) {
        if links.iter().all(|link| link.installed_path.is_some()) {
            ReleaseStatus::Enabled
        } else {
            ReleaseStatus::Disabled
        }
    } else {
        ReleaseStatus::InProgress
    }
}

/// Arithmetic mean, 0 for an empty set.
pub fn mean_progress(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
