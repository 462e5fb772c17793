//! Durable job records: one row per attempt, grouped by a stable job id.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{JobError, JobFilter, JobStore};
pub use types::{JobRecord, JobState, NewJob};
