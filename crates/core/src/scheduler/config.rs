//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often each processor's poll loop looks for runnable jobs (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// What happens after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The failed attempt is final.
    Never,
    /// Insert a new attempt of the same job, eligible after `delay`.
    /// Attempts are unbounded.
    FixedBackoff { delay: Duration },
}

/// Admission and retry settings for one registered processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Maximum attempts executing at once. 1 = single-flight.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
}

impl ProcessorOptions {
    /// One job at a time, retried after a fixed delay.
    pub fn single_flight(backoff: Duration) -> Self {
        Self {
            max_concurrent: 1,
            retry: RetryPolicy::FixedBackoff { delay: backoff },
        }
    }

    /// Up to `max_concurrent` jobs at a time, never retried.
    pub fn concurrent(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            retry: RetryPolicy::Never,
        }
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self::concurrent(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_deserialize_config() {
        let config: SchedulerConfig = toml::from_str("poll_interval_ms = 50").unwrap();
        assert_eq!(config.poll_interval_ms, 50);
    }

    #[test]
    fn test_single_flight_options() {
        let options = ProcessorOptions::single_flight(Duration::from_secs(30));
        assert_eq!(options.max_concurrent, 1);
        assert_eq!(
            options.retry,
            RetryPolicy::FixedBackoff {
                delay: Duration::from_secs(30)
            }
        );
    }
}
