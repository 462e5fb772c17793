//! Enabling and disabling releases by creating and removing install links.

mod toggler;

pub use toggler::{DisableOutcome, LinkObserver, ReleaseToggle, ToggleError};
