//! Generic polling job scheduler.
//!
//! Processors are registered by name with their own admission settings:
//! - **download**: single-flight, retried after a fixed backoff
//! - **extract**: a few at a time, failures are final
//!
//! Every success is broadcast as a [`JobEvent`] so that dependent pipelines
//! can react without polling the store.

mod config;
mod processor;
mod runner;
mod types;

pub use config::{ProcessorOptions, RetryPolicy, SchedulerConfig};
pub use processor::{Processor, ProcessorContext, ProcessorFailure, ProgressReporter};
pub use runner::JobScheduler;
pub use types::{JobEvent, ProcessorStatus, SchedulerError, SchedulerStatus};
