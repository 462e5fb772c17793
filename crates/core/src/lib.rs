pub mod config;
pub mod job;
pub mod link;
pub mod mission_script;
pub mod pipeline;
pub mod process;
pub mod release;
pub mod scheduler;
pub mod testing;
pub mod toggle;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, PathsConfig,
};
pub use job::{JobError, JobRecord, JobState, JobStore, SqliteJobStore};
pub use link::{LinkCreator, LinkError, SystemLinkOps};
pub use mission_script::{MissionScriptAggregator, ScriptError, ScriptRebuilder};
pub use pipeline::{DownloadProcessor, ExtractProcessor, PipelineError, ReleaseAssetPipeline};
pub use process::{ProcessError, ProcessRunner};
pub use release::{
    Release, ReleaseError, ReleaseStatus, ReleaseStore, ReleaseWithStatus, SqliteReleaseStore,
};
pub use scheduler::{JobEvent, JobScheduler, SchedulerConfig, SchedulerError};
pub use toggle::{DisableOutcome, ReleaseToggle, ToggleError};
