//! Mock processor for scheduler tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::job::JobRecord;
use crate::scheduler::{Processor, ProcessorContext, ProcessorFailure};

/// What the next call to `process` does.
#[derive(Debug, Clone)]
enum Behavior {
    Fail(ProcessorFailure),
    WaitForCancel,
}

/// Processor with scripted outcomes.
///
/// Calls succeed unless a behavior was queued. Clones share state so a test
/// can keep a handle after registering the processor.
#[derive(Debug, Clone)]
pub struct MockProcessor {
    name: String,
    behaviors: Arc<RwLock<VecDeque<Behavior>>>,
    delay: Arc<RwLock<Duration>>,
    processed: Arc<RwLock<Vec<String>>>,
    in_flight: Arc<RwLock<usize>>,
    max_in_flight: Arc<RwLock<usize>>,
}

impl MockProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviors: Arc::new(RwLock::new(VecDeque::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            processed: Arc::new(RwLock::new(Vec::new())),
            in_flight: Arc::new(RwLock::new(0)),
            max_in_flight: Arc::new(RwLock::new(0)),
        }
    }

    /// Make the next call fail.
    pub async fn push_failure(&self, failure: ProcessorFailure) {
        self.behaviors
            .write()
            .await
            .push_back(Behavior::Fail(failure));
    }

    /// Make the next call block until its job is cancelled.
    pub async fn push_wait_for_cancel(&self) {
        self.behaviors
            .write()
            .await
            .push_back(Behavior::WaitForCancel);
    }

    /// Simulated work duration of every call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Run ids in the order they were processed.
    pub async fn processed_run_ids(&self) -> Vec<String> {
        self.processed.read().await.clone()
    }

    /// Highest number of calls observed running at once.
    pub async fn max_in_flight(&self) -> usize {
        *self.max_in_flight.read().await
    }

    async fn enter(&self) {
        let mut in_flight = self.in_flight.write().await;
        *in_flight += 1;
        let mut max = self.max_in_flight.write().await;
        *max = (*max).max(*in_flight);
    }

    async fn leave(&self) {
        *self.in_flight.write().await -= 1;
    }
}

#[async_trait]
impl Processor for MockProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        job: &JobRecord,
        ctx: ProcessorContext,
    ) -> Result<serde_json::Value, ProcessorFailure> {
        self.enter().await;
        let behavior = self.behaviors.write().await.pop_front();

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = match behavior {
            Some(Behavior::Fail(failure)) => Err(failure),
            Some(Behavior::WaitForCancel) => {
                ctx.cancel.cancelled().await;
                Err(ProcessorFailure::fatal("CANCELLED", "job cancelled"))
            }
            None => {
                ctx.progress.report(50);
                Ok(serde_json::json!({ "run_id": job.run_id }))
            }
        };

        self.processed.write().await.push(job.run_id.clone());
        self.leave().await;
        outcome
    }
}
