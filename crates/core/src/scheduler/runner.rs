//! Job scheduler implementation.
//!
//! One poll loop per registered processor. Each tick claims as many runnable
//! attempts as the processor has free slots and runs them in the background.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{JobError, JobRecord, JobState, JobStore, NewJob};

use super::config::{ProcessorOptions, RetryPolicy, SchedulerConfig};
use super::processor::{Processor, ProcessorContext};
use super::types::{JobEvent, ProcessorStatus, SchedulerError, SchedulerStatus};

/// Buffer size for the job event channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// A processor plus its admission state.
struct Registration {
    processor: Arc<dyn Processor>,
    options: ProcessorOptions,
    slots: Arc<Semaphore>,
}

impl Registration {
    fn name(&self) -> &str {
        self.processor.name()
    }
}

/// State shared between the scheduler handle and its background tasks.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl Worker {
    /// Claims one attempt if the processor has a free slot.
    fn try_claim(
        &self,
        registration: &Registration,
    ) -> Result<Option<(JobRecord, OwnedSemaphorePermit)>, SchedulerError> {
        let Ok(permit) = Arc::clone(&registration.slots).try_acquire_owned() else {
            return Ok(None);
        };

        let claimed = self.store.claim_next(registration.name())?;
        Ok(claimed.map(|job| (job, permit)))
    }

    /// Runs a claimed attempt to completion and persists the outcome.
    async fn execute(
        &self,
        registration: Arc<Registration>,
        job: JobRecord,
        _permit: OwnedSemaphorePermit,
    ) {
        let token = CancellationToken::new();
        self.active
            .write()
            .await
            .insert(job.run_id.clone(), token.clone());

        info!(
            "Running {} job {} (run {}, attempt {})",
            registration.name(),
            job.job_id,
            job.run_id,
            job.attempt
        );

        let ctx = ProcessorContext::new(job.run_id.clone(), Arc::clone(&self.store), token.clone());
        let outcome = registration.processor.process(&job, ctx).await;

        self.active.write().await.remove(&job.run_id);

        match outcome {
            Ok(result) => match self.store.complete(&job.run_id, result) {
                Ok(record) => {
                    info!("{} job {} succeeded", registration.name(), record.job_id);
                    let _ = self.events.send(JobEvent::Succeeded(record));
                }
                Err(JobError::InvalidState { current_state, .. }) => {
                    debug!(
                        "Run {} finished but is already {}, keeping it",
                        job.run_id, current_state
                    );
                }
                Err(e) => error!("Failed to record success of run {}: {}", job.run_id, e),
            },
            Err(_) if token.is_cancelled() => {
                // Cancelled jobs were already written by `cancel`; a scheduler
                // stop leaves the attempt running so the next start re-claims it.
                debug!("Run {} ended after cancellation", job.run_id);
            }
            Err(failure) => {
                let record = match self.store.fail(&job.run_id, &failure.code, &failure.message) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Failed to record failure of run {}: {}", job.run_id, e);
                        return;
                    }
                };
                warn!(
                    "{} job {} failed (attempt {}): {}",
                    registration.name(),
                    record.job_id,
                    record.attempt,
                    failure
                );
                let _ = self.events.send(JobEvent::Failed(record.clone()));

                if let (true, RetryPolicy::FixedBackoff { delay }) =
                    (failure.retryable, registration.options.retry)
                {
                    self.schedule_retry(&record, delay);
                }
            }
        }
    }

    fn schedule_retry(&self, failed: &JobRecord, delay: Duration) {
        let not_before = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        match self.store.add(NewJob::retry_of(failed, not_before)) {
            Ok(retry) => info!(
                "Scheduled attempt {} of job {} after {:?}",
                retry.attempt, retry.job_id, delay
            ),
            Err(e) => error!("Failed to schedule retry of job {}: {}", failed.job_id, e),
        }
    }
}

/// The job scheduler - polls the store and drives processors.
pub struct JobScheduler {
    config: SchedulerConfig,
    worker: Worker,
    registrations: HashMap<String, Arc<Registration>>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Create a new scheduler over a job store.
    pub fn new(config: SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        Self {
            config,
            worker: Worker {
                store,
                events,
                active: Arc::new(RwLock::new(HashMap::new())),
            },
            registrations: HashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Register a processor. Must happen before `start`.
    pub fn register(
        &mut self,
        processor: Arc<dyn Processor>,
        options: ProcessorOptions,
    ) -> Result<(), SchedulerError> {
        let name = processor.name().to_string();
        if self.registrations.contains_key(&name) {
            return Err(SchedulerError::AlreadyRegistered(name));
        }

        let slots = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        self.registrations.insert(
            name,
            Arc::new(Registration {
                processor,
                options,
                slots,
            }),
        );
        Ok(())
    }

    /// The underlying job store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.worker.store
    }

    /// Receive an event for every attempt finished through this scheduler.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.worker.events.subscribe()
    }

    /// Create the first attempt of a new job.
    pub fn add(
        &self,
        processor: &str,
        data: serde_json::Value,
        initial_state: JobState,
    ) -> Result<JobRecord, SchedulerError> {
        if !matches!(initial_state, JobState::Runnable | JobState::Gated) {
            return Err(SchedulerError::InvalidInitialState(initial_state));
        }
        let job = self
            .worker
            .store
            .add(NewJob::new(processor, data, initial_state))?;
        debug!("Added {} job {} as {}", processor, job.job_id, initial_state);
        Ok(job)
    }

    /// Flip a gated attempt to runnable.
    pub fn unblock(&self, run_id: &str) -> Result<JobRecord, SchedulerError> {
        let job = self.worker.store.unblock(run_id)?;
        info!("Unblocked {} job {}", job.processor, job.job_id);
        Ok(job)
    }

    /// Cancel a non-terminal attempt, aborting its process if it is running here.
    pub async fn cancel(&self, run_id: &str) -> Result<JobRecord, SchedulerError> {
        // Persist first so the processor's outcome cannot overwrite the cancellation
        let record = self.worker.store.cancel(run_id)?;

        if let Some(token) = self.worker.active.read().await.get(run_id) {
            token.cancel();
        }

        info!("Cancelled {} job {}", record.processor, record.job_id);
        let _ = self.worker.events.send(JobEvent::Cancelled(record.clone()));
        Ok(record)
    }

    /// Waits until no processor of this scheduler is executing the attempt.
    ///
    /// Returns false if it is still executing after `timeout`.
    pub async fn wait_inactive(&self, run_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.worker.active.read().await.contains_key(run_id) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Claim and execute at most one attempt of a processor inline.
    ///
    /// Returns the attempt as persisted after execution, or None when nothing
    /// was runnable or all slots were busy.
    pub async fn run_once(&self, processor: &str) -> Result<Option<JobRecord>, SchedulerError> {
        let registration = self
            .registrations
            .get(processor)
            .ok_or_else(|| SchedulerError::UnknownProcessor(processor.to_string()))?;

        let Some((job, permit)) = self.worker.try_claim(registration)? else {
            return Ok(None);
        };

        let run_id = job.run_id.clone();
        self.worker
            .execute(Arc::clone(registration), job, permit)
            .await;
        Ok(self.worker.store.get(&run_id)?)
    }

    /// Start the scheduler (spawns one poll loop per processor).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!("Starting job scheduler");

        let mut loops = self.loops.lock().await;
        for registration in self.registrations.values() {
            // Attempts left running by a previous process are re-claimed
            match self.worker.store.requeue_running(registration.name()) {
                Ok(0) => {}
                Ok(count) => info!(
                    "Re-queued {} orphaned {} jobs",
                    count,
                    registration.name()
                ),
                Err(e) => error!(
                    "Failed to re-queue orphaned {} jobs: {}",
                    registration.name(),
                    e
                ),
            }

            loops.push(self.spawn_poll_loop(Arc::clone(registration)));
        }

        info!("Job scheduler started");
    }

    /// Stop the scheduler gracefully.
    ///
    /// In-flight processes are aborted; their attempts stay running and are
    /// re-queued by the next `start`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping job scheduler");

        let _ = self.shutdown_tx.send(());

        for token in self.worker.active.read().await.values() {
            token.cancel();
        }

        let loops: Vec<_> = self.loops.lock().await.drain(..).collect();
        for result in futures::future::join_all(loops).await {
            if let Err(e) = result {
                error!("Poll loop ended abnormally: {}", e);
            }
        }

        info!("Job scheduler stopped");
    }

    /// Get current scheduler status.
    pub fn status(&self) -> SchedulerStatus {
        let mut processors: Vec<ProcessorStatus> = self
            .registrations
            .values()
            .map(|registration| {
                let max_concurrent = registration.options.max_concurrent.max(1);
                ProcessorStatus {
                    name: registration.name().to_string(),
                    max_concurrent,
                    active: max_concurrent - registration.slots.available_permits(),
                }
            })
            .collect();
        processors.sort_by(|a, b| a.name.cmp(&b.name));

        SchedulerStatus {
            running: self.running.load(Ordering::Relaxed),
            processors,
        }
    }

    fn spawn_poll_loop(&self, registration: Arc<Registration>) -> JoinHandle<()> {
        let worker = self.worker.clone();
        let running = Arc::clone(&self.running);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("{} poll loop started", registration.name());
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("{} poll loop received shutdown signal", registration.name());
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }

                        // Fill every free slot
                        loop {
                            match worker.try_claim(&registration) {
                                Ok(Some((job, permit))) => {
                                    let worker = worker.clone();
                                    let registration = Arc::clone(&registration);
                                    tokio::spawn(async move {
                                        worker.execute(registration, job, permit).await;
                                    });
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("Failed to claim {} job: {}", registration.name(), e);
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            info!("{} poll loop stopped", registration.name());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SqliteJobStore;
    use crate::scheduler::ProcessorFailure;
    use crate::testing::MockProcessor;
    use serde_json::json;

    fn scheduler_with(processor: MockProcessor, options: ProcessorOptions) -> JobScheduler {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let mut scheduler = JobScheduler::new(
            SchedulerConfig {
                poll_interval_ms: 10,
            },
            store,
        );
        scheduler.register(Arc::new(processor), options).unwrap();
        scheduler
    }

    #[tokio::test]
    async fn test_run_once_succeeds_and_emits_event() {
        let processor = MockProcessor::new("download");
        let scheduler = scheduler_with(processor.clone(), ProcessorOptions::default());
        let mut events = scheduler.subscribe();

        let job = scheduler
            .add("download", json!({"n": 1}), JobState::Runnable)
            .unwrap();
        let done = scheduler.run_once("download").await.unwrap().unwrap();

        assert_eq!(done.run_id, job.run_id);
        assert_eq!(done.state, JobState::Succeeded);
        assert_eq!(done.progress, Some(100));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, JobEvent::Succeeded(ref r) if r.run_id == job.run_id));
        assert_eq!(processor.processed_run_ids().await, vec![job.run_id]);
    }

    #[tokio::test]
    async fn test_run_once_nothing_runnable() {
        let scheduler = scheduler_with(MockProcessor::new("download"), ProcessorOptions::default());
        scheduler
            .add("download", json!({}), JobState::Gated)
            .unwrap();
        assert!(scheduler.run_once("download").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_processor() {
        let scheduler = scheduler_with(MockProcessor::new("download"), ProcessorOptions::default());
        let result = scheduler.run_once("extract").await;
        assert!(matches!(result, Err(SchedulerError::UnknownProcessor(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let mut scheduler =
            scheduler_with(MockProcessor::new("download"), ProcessorOptions::default());
        let result = scheduler.register(
            Arc::new(MockProcessor::new("download")),
            ProcessorOptions::default(),
        );
        assert!(matches!(result, Err(SchedulerError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_add_rejects_running_state() {
        let scheduler = scheduler_with(MockProcessor::new("download"), ProcessorOptions::default());
        let result = scheduler.add("download", json!({}), JobState::Running);
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidInitialState(JobState::Running))
        ));
    }

    #[tokio::test]
    async fn test_failure_without_retry_is_terminal() {
        let processor = MockProcessor::new("extract");
        processor
            .push_failure(ProcessorFailure::retryable("PROCESS_ERROR", "exit code 2"))
            .await;
        let scheduler = scheduler_with(processor, ProcessorOptions::concurrent(2));

        let job = scheduler
            .add("extract", json!({}), JobState::Runnable)
            .unwrap();
        let done = scheduler.run_once("extract").await.unwrap().unwrap();

        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.error_code.as_deref(), Some("PROCESS_ERROR"));
        assert_eq!(scheduler.store().attempts(&job.job_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_schedules_new_attempt() {
        let processor = MockProcessor::new("download");
        processor
            .push_failure(ProcessorFailure::retryable("PROCESS_ERROR", "network"))
            .await;
        let scheduler = scheduler_with(
            processor,
            ProcessorOptions::single_flight(Duration::from_secs(30)),
        );

        let job = scheduler
            .add("download", json!({}), JobState::Runnable)
            .unwrap();
        scheduler.run_once("download").await.unwrap();

        let attempts = scheduler.store().attempts(&job.job_id).unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].state, JobState::Failed);
        assert_eq!(attempts[1].state, JobState::Runnable);
        assert_eq!(attempts[1].attempt, 2);
        assert!(attempts[1].not_before.unwrap() > Utc::now());

        // Backoff not elapsed yet
        assert!(scheduler.run_once("download").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let processor = MockProcessor::new("download");
        processor
            .push_failure(ProcessorFailure::fatal("PROPS_ERROR", "missing wget"))
            .await;
        let scheduler = scheduler_with(
            processor,
            ProcessorOptions::single_flight(Duration::from_secs(30)),
        );

        let job = scheduler
            .add("download", json!({}), JobState::Runnable)
            .unwrap();
        scheduler.run_once("download").await.unwrap();

        assert_eq!(scheduler.store().attempts(&job.job_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_running_job_aborts_processor() {
        let processor = MockProcessor::new("download");
        processor.push_wait_for_cancel().await;
        let scheduler = Arc::new(scheduler_with(processor, ProcessorOptions::default()));

        let job = scheduler
            .add("download", json!({}), JobState::Runnable)
            .unwrap();

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_once("download").await })
        };

        // Wait until the processor is executing
        while scheduler.worker.active.read().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        scheduler.cancel(&job.run_id).await.unwrap();
        let done = runner.await.unwrap().unwrap().unwrap();
        assert_eq!(done.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_inactive_after_cancel() {
        let processor = MockProcessor::new("download");
        processor.push_wait_for_cancel().await;
        let scheduler = Arc::new(scheduler_with(processor, ProcessorOptions::default()));

        let job = scheduler
            .add("download", json!({}), JobState::Runnable)
            .unwrap();
        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_once("download").await })
        };
        while scheduler.worker.active.read().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Still executing until cancelled
        assert!(
            !scheduler
                .wait_inactive(&job.run_id, Duration::from_millis(30))
                .await
        );

        scheduler.cancel(&job.run_id).await.unwrap();
        assert!(
            scheduler
                .wait_inactive(&job.run_id, Duration::from_secs(5))
                .await
        );
        assert!(scheduler.worker.active.read().await.is_empty());
        runner.await.unwrap().unwrap();

        // Unknown runs are never active
        assert!(scheduler.wait_inactive("missing", Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_cancel_twice_reports_terminal() {
        let scheduler = scheduler_with(MockProcessor::new("download"), ProcessorOptions::default());
        let job = scheduler
            .add("download", json!({}), JobState::Gated)
            .unwrap();

        scheduler.cancel(&job.run_id).await.unwrap();
        let second = scheduler.cancel(&job.run_id).await;
        assert!(matches!(
            second,
            Err(SchedulerError::Job(JobError::InvalidState { .. }))
        ));
    }

    #[tokio::test]
    async fn test_poll_loop_processes_jobs() {
        let processor = MockProcessor::new("download");
        let scheduler = scheduler_with(processor.clone(), ProcessorOptions::default());
        let mut events = scheduler.subscribe();

        scheduler
            .add("download", json!({}), JobState::Runnable)
            .unwrap();
        scheduler.start().await;

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("job should finish")
            .unwrap();
        assert!(matches!(event, JobEvent::Succeeded(_)));

        scheduler.stop().await;
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn test_single_flight_never_overlaps() {
        let processor = MockProcessor::new("download");
        processor.set_delay(Duration::from_millis(30)).await;
        let scheduler = scheduler_with(
            processor.clone(),
            ProcessorOptions::single_flight(Duration::from_secs(30)),
        );
        let mut events = scheduler.subscribe();

        for _ in 0..3 {
            scheduler
                .add("download", json!({}), JobState::Runnable)
                .unwrap();
        }
        scheduler.start().await;

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("job should finish")
                .unwrap();
        }
        scheduler.stop().await;

        assert_eq!(processor.max_in_flight().await, 1);
        assert_eq!(processor.processed_run_ids().await.len(), 3);
    }

    #[tokio::test]
    async fn test_start_requeues_orphaned_running_jobs() {
        let scheduler = scheduler_with(MockProcessor::new("download"), ProcessorOptions::default());
        let mut events = scheduler.subscribe();

        let job = scheduler
            .add("download", json!({}), JobState::Runnable)
            .unwrap();
        // Simulate a crash after the claim
        scheduler.store().claim_next("download").unwrap();

        scheduler.start().await;
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("orphan should be re-run")
            .unwrap();
        scheduler.stop().await;

        assert_eq!(event.record().run_id, job.run_id);
        assert_eq!(event.record().state, JobState::Succeeded);
    }
}
