//! Release asset pipeline: job graphs per release, gating, status aggregation.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PathsConfig;
use crate::job::{JobError, JobRecord, JobState, JobStore};
use crate::process::file_name_from_url;
use crate::release::{
    asset_status, mean_progress, release_status, AssetWithStatus, Release, ReleaseStore,
    ReleaseWithStatus,
};
use crate::scheduler::{JobEvent, JobScheduler, SchedulerError};

use super::error::PipelineError;
use super::jobs::{
    decode, encode, DownloadJobData, ExtractJobData, JobTag, DOWNLOAD_PROCESSOR,
    EXTRACT_PROCESSOR,
};

/// How long `remove_release` waits for a cancelled run to stop.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Pause before the second attempt at removing a staging directory.
const STAGING_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Deletes a directory tree; a missing directory is fine.
async fn remove_staging_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("Removed staging directory {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => f.write_str("download"),
            Stage::Extract => f.write_str("extract"),
        }
    }
}

/// Whether every job of each stage has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReadiness {
    pub downloads_complete: bool,
    pub extracts_complete: bool,
}

impl StageReadiness {
    /// The first stage that is not complete.
    pub fn incomplete_stage(&self) -> Option<Stage> {
        if !self.downloads_complete {
            Some(Stage::Download)
        } else if !self.extracts_complete {
            Some(Stage::Extract)
        } else {
            None
        }
    }
}

/// Creates and tracks the download/extract jobs of releases.
pub struct ReleaseAssetPipeline {
    releases: Arc<dyn ReleaseStore>,
    scheduler: Arc<JobScheduler>,
    paths: PathsConfig,
}

impl ReleaseAssetPipeline {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        scheduler: Arc<JobScheduler>,
        paths: PathsConfig,
    ) -> Self {
        Self {
            releases,
            scheduler,
            paths,
        }
    }

    pub fn releases(&self) -> &Arc<dyn ReleaseStore> {
        &self.releases
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    fn jobs(&self) -> &Arc<dyn JobStore> {
        self.scheduler.store()
    }

    /// Every URL must name a file, or no job of the release could run.
    fn validate_assets(release: &Release) -> Result<(), PipelineError> {
        for asset in &release.assets {
            for url in &asset.urls {
                file_name_from_url(&url.url).map_err(|e| PipelineError::InvalidAsset {
                    asset_id: asset.id.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Creates one job and associates it with the release.
    fn enqueue(
        &self,
        release_id: &str,
        processor: &str,
        data: serde_json::Value,
        state: JobState,
    ) -> Result<JobRecord, PipelineError> {
        let job = self.scheduler.add(processor, data, state)?;
        self.releases
            .add_release_jobs(release_id, std::slice::from_ref(&job.job_id))?;
        Ok(job)
    }

    /// Persists a release and enqueues its download and extract jobs.
    ///
    /// Returns the jobs as created: downloads runnable, then extracts gated.
    pub async fn add_release(&self, release: &Release) -> Result<Vec<JobRecord>, PipelineError> {
        Self::validate_assets(release)?;
        self.releases.insert(release)?;

        let staging_dir = self.paths.release_staging_dir(&release.release_id);
        tokio::fs::create_dir_all(&staging_dir).await?;

        // Every download must exist before the first extract
        let mut created = Vec::new();
        for asset in &release.assets {
            for url in &asset.urls {
                let data = DownloadJobData {
                    release_id: release.release_id.clone(),
                    asset_id: asset.id.clone(),
                    url_id: url.url_id.clone(),
                    url: url.url.clone(),
                    target_dir: staging_dir.clone(),
                };
                created.push(self.enqueue(
                    &release.release_id,
                    DOWNLOAD_PROCESSOR,
                    encode(&data)?,
                    JobState::Runnable,
                )?);
            }
        }

        for asset in release.assets.iter().filter(|asset| asset.is_archive) {
            let Some(first) = asset.urls.first() else {
                warn!(
                    "Archive asset {} of release {} has no URLs, nothing to extract",
                    asset.id, release.release_id
                );
                continue;
            };

            let file_name = file_name_from_url(&first.url).map_err(|e| {
                PipelineError::InvalidAsset {
                    asset_id: asset.id.clone(),
                    reason: e.to_string(),
                }
            })?;
            let data = ExtractJobData {
                release_id: release.release_id.clone(),
                asset_id: asset.id.clone(),
                archive_path: staging_dir.join(file_name),
                destination: staging_dir.clone(),
            };
            created.push(self.enqueue(
                &release.release_id,
                EXTRACT_PROCESSOR,
                encode(&data)?,
                JobState::Gated,
            )?);
        }

        // Downloads may have succeeded before their extracts existed
        self.unblock_extracts(&release.release_id)?;

        info!(
            "Added release {} ({} {}) with {} jobs",
            release.release_id,
            release.mod_name,
            release.version,
            created.len()
        );
        Ok(created)
    }

    /// Latest attempt of every job of a release.
    fn latest_jobs(&self, release_id: &str) -> Result<Vec<JobRecord>, PipelineError> {
        let job_ids = self.releases.release_job_ids(release_id)?;
        Ok(self.jobs().latest_for_jobs(&job_ids)?)
    }

    /// Unblocks the gated extract jobs of a release once all of its downloads
    /// have succeeded. Returns how many jobs were unblocked.
    pub fn unblock_extracts(&self, release_id: &str) -> Result<usize, PipelineError> {
        let latest = self.latest_jobs(release_id)?;

        let all_downloaded = latest
            .iter()
            .filter(|job| job.processor == DOWNLOAD_PROCESSOR)
            .all(|job| job.state == JobState::Succeeded);
        if !all_downloaded {
            return Ok(0);
        }

        let mut unblocked = 0;
        for job in latest
            .iter()
            .filter(|job| job.processor == EXTRACT_PROCESSOR && job.state == JobState::Gated)
        {
            match self.scheduler.unblock(&job.run_id) {
                Ok(_) => unblocked += 1,
                // Another event got there first
                Err(SchedulerError::Job(JobError::InvalidState { .. })) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if unblocked > 0 {
            info!(
                "All downloads of release {} done, unblocked {} extract jobs",
                release_id, unblocked
            );
        }
        Ok(unblocked)
    }

    /// Reacts to a succeeded job. Only downloads can unblock anything.
    pub fn on_job_succeeded(&self, job: &JobRecord) -> Result<usize, PipelineError> {
        if job.processor != DOWNLOAD_PROCESSOR {
            return Ok(0);
        }
        let tag: JobTag = decode(job)?;
        self.unblock_extracts(&tag.release_id)
    }

    /// Re-runs gating for every release, for events that were missed.
    pub fn reconcile(&self) -> Result<usize, PipelineError> {
        let mut unblocked = 0;
        for release in self.releases.list()? {
            unblocked += self.unblock_extracts(&release.release_id)?;
        }
        Ok(unblocked)
    }

    /// Subscribes to scheduler events and gates extract jobs until `shutdown`.
    pub fn spawn_event_listener(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut events = self.scheduler.subscribe();

        tokio::spawn(async move {
            info!("Pipeline event listener started");

            // Downloads may have finished while nobody was listening
            if let Err(e) = pipeline.reconcile() {
                error!("Failed to reconcile releases: {}", e);
            }

            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(JobEvent::Succeeded(job)) => {
                        if let Err(e) = pipeline.on_job_succeeded(&job) {
                            error!("Failed to handle success of job {}: {}", job.job_id, e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Pipeline listener missed {} job events, reconciling", missed);
                        if let Err(e) = pipeline.reconcile() {
                            error!("Failed to reconcile releases: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            info!("Pipeline event listener stopped");
        })
    }

    /// Cancels the release's unfinished jobs, deletes its staging directory
    /// and forgets its job associations. The release itself is kept.
    pub async fn remove_release(&self, release_id: &str) -> Result<(), PipelineError> {
        let mut cancelled = Vec::new();
        for job in self.latest_jobs(release_id)? {
            if job.state.is_terminal() {
                continue;
            }
            match self.scheduler.cancel(&job.run_id).await {
                Ok(_) => cancelled.push(job.run_id),
                // Finished in the meantime
                Err(SchedulerError::Job(JobError::InvalidState { .. })) => {
                    debug!("Job {} finished before it could be cancelled", job.job_id)
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Aborted tools may still hold files in the staging directory
        for run_id in &cancelled {
            if !self.scheduler.wait_inactive(run_id, CANCEL_GRACE).await {
                warn!("Run {} still executing after cancellation", run_id);
            }
        }

        let staging_dir = self.paths.release_staging_dir(release_id);
        if let Err(e) = remove_staging_dir(&staging_dir).await {
            warn!(
                "Failed to remove {}, retrying: {}",
                staging_dir.display(),
                e
            );
            tokio::time::sleep(STAGING_RETRY_DELAY).await;
            remove_staging_dir(&staging_dir).await?;
        }

        self.releases.clear_release_jobs(release_id)?;
        info!("Removed release {}", release_id);
        Ok(())
    }

    /// Removes a release and purges every record of it.
    ///
    /// Jobs are found through their payload too, so a release that was
    /// removed before is still purged completely.
    pub async fn delete_release(&self, release_id: &str) -> Result<(), PipelineError> {
        if self.releases.get(release_id)?.is_none() {
            return Err(PipelineError::ReleaseNotFound(release_id.to_string()));
        }

        let mut job_ids = self.releases.release_job_ids(release_id)?;
        for job_id in self.jobs().job_ids_by_data("release_id", release_id)? {
            if !job_ids.contains(&job_id) {
                job_ids.push(job_id);
            }
        }

        self.remove_release(release_id).await?;
        let purged = self.jobs().purge(&job_ids)?;
        self.releases.delete(release_id)?;

        info!("Deleted release {} ({} job records)", release_id, purged);
        Ok(())
    }

    /// True when no job of the release is gated or running.
    pub fn is_release_ready(&self, release_id: &str) -> Result<bool, PipelineError> {
        Ok(self
            .latest_jobs(release_id)?
            .iter()
            .all(|job| !matches!(job.state, JobState::Gated | JobState::Running)))
    }

    /// Per-stage completion of a release.
    pub fn stage_readiness(&self, release_id: &str) -> Result<StageReadiness, PipelineError> {
        let latest = self.latest_jobs(release_id)?;
        let complete = |processor: &str| {
            latest
                .iter()
                .filter(|job| job.processor == processor)
                .all(|job| job.state == JobState::Succeeded)
        };
        Ok(StageReadiness {
            downloads_complete: complete(DOWNLOAD_PROCESSOR),
            extracts_complete: complete(EXTRACT_PROCESSOR),
        })
    }

    fn with_status(&self, release: Release) -> Result<ReleaseWithStatus, PipelineError> {
        let mut by_asset: HashMap<String, Vec<JobRecord>> = HashMap::new();
        for job in self.latest_jobs(&release.release_id)? {
            let tag: JobTag = decode(&job)?;
            by_asset.entry(tag.asset_id).or_default().push(job);
        }

        let mut assets = Vec::with_capacity(release.assets.len());
        for asset in &release.assets {
            let jobs = by_asset.remove(&asset.id).unwrap_or_default();
            let (downloads, extracts): (Vec<&JobRecord>, Vec<&JobRecord>) = jobs
                .iter()
                .partition(|job| job.processor == DOWNLOAD_PROCESSOR);

            let states = |jobs: &[&JobRecord]| jobs.iter().map(|job| job.state).collect::<Vec<_>>();
            let progress = |jobs: &[&JobRecord]| {
                jobs.iter()
                    .map(|job| f64::from(job.progress.unwrap_or(0)))
                    .collect::<Vec<_>>()
            };

            let download_progress = progress(&downloads[..]);
            let extract_progress = progress(&extracts[..]);
            let overall: Vec<f64> = download_progress
                .iter()
                .chain(&extract_progress)
                .copied()
                .collect();

            assets.push(AssetWithStatus {
                asset: asset.clone(),
                status: asset_status(&states(&downloads[..]), &states(&extracts[..])),
                download_progress: mean_progress(&download_progress),
                extract_progress: mean_progress(&extract_progress),
                progress: mean_progress(&overall),
            });
        }

        let statuses: Vec<_> = assets.iter().map(|a| a.status).collect();
        let overall: Vec<f64> = assets.iter().map(|a| a.progress).collect();

        Ok(ReleaseWithStatus {
            status: release_status(&statuses, &release.links),
            progress: mean_progress(&overall),
            release,
            assets,
        })
    }

    pub fn get_release_with_status(
        &self,
        release_id: &str,
    ) -> Result<Option<ReleaseWithStatus>, PipelineError> {
        self.releases
            .get(release_id)?
            .map(|release| self.with_status(release))
            .transpose()
    }

    /// Every release with its computed status, oldest first.
    pub fn get_all_releases_with_status(&self) -> Result<Vec<ReleaseWithStatus>, PipelineError> {
        self.releases
            .list()?
            .into_iter()
            .map(|release| self.with_status(release))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobFilter, NewJob, SqliteJobStore};
    use crate::release::{AssetStatus, ReleaseStatus, SqliteReleaseStore};
    use crate::scheduler::{ProcessorOptions, SchedulerConfig};
    use crate::testing::{fixtures, MockProcessor};
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        paths: PathsConfig,
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<ReleaseAssetPipeline>,
    }

    fn harness() -> Harness {
        harness_with(Arc::new(SqliteJobStore::in_memory().unwrap()), Vec::new())
    }

    fn harness_with(jobs: Arc<dyn JobStore>, processors: Vec<MockProcessor>) -> Harness {
        let temp = TempDir::new().unwrap();
        let paths = fixtures::paths(temp.path());
        let mut scheduler = JobScheduler::new(SchedulerConfig::default(), Arc::clone(&jobs));
        for processor in processors {
            scheduler
                .register(Arc::new(processor), ProcessorOptions::default())
                .unwrap();
        }
        let scheduler = Arc::new(scheduler);
        let releases: Arc<dyn ReleaseStore> = Arc::new(SqliteReleaseStore::in_memory().unwrap());
        let pipeline = Arc::new(ReleaseAssetPipeline::new(releases, scheduler, paths.clone()));
        Harness {
            _temp: temp,
            paths,
            jobs,
            pipeline,
        }
    }

    /// Job store whose downloads succeed the moment they are added, like a
    /// poll loop that claims them before the release is fully added.
    struct EagerDownloads {
        inner: SqliteJobStore,
        reject_extracts: bool,
    }

    impl EagerDownloads {
        fn new(reject_extracts: bool) -> Self {
            Self {
                inner: SqliteJobStore::in_memory().unwrap(),
                reject_extracts,
            }
        }
    }

    impl JobStore for EagerDownloads {
        fn add(&self, job: NewJob) -> Result<JobRecord, JobError> {
            if self.reject_extracts && job.processor == EXTRACT_PROCESSOR {
                return Err(JobError::Database("disk full".to_string()));
            }
            let record = self.inner.add(job)?;
            if record.processor == DOWNLOAD_PROCESSOR {
                let claimed = self.inner.claim_next(DOWNLOAD_PROCESSOR)?.unwrap();
                self.inner.complete(&claimed.run_id, json!({}))?;
            }
            Ok(record)
        }

        fn get(&self, run_id: &str) -> Result<Option<JobRecord>, JobError> {
            self.inner.get(run_id)
        }

        fn attempts(&self, job_id: &str) -> Result<Vec<JobRecord>, JobError> {
            self.inner.attempts(job_id)
        }

        fn latest(&self, job_id: &str) -> Result<Option<JobRecord>, JobError> {
            self.inner.latest(job_id)
        }

        fn latest_for_jobs(&self, job_ids: &[String]) -> Result<Vec<JobRecord>, JobError> {
            self.inner.latest_for_jobs(job_ids)
        }

        fn by_processor(&self, processor: &str) -> Result<Vec<JobRecord>, JobError> {
            self.inner.by_processor(processor)
        }

        fn by_states(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobError> {
            self.inner.by_states(filter)
        }

        fn claim_next(&self, processor: &str) -> Result<Option<JobRecord>, JobError> {
            self.inner.claim_next(processor)
        }

        fn unblock(&self, run_id: &str) -> Result<JobRecord, JobError> {
            self.inner.unblock(run_id)
        }

        fn update_progress(&self, run_id: &str, progress: u8) -> Result<(), JobError> {
            self.inner.update_progress(run_id, progress)
        }

        fn complete(&self, run_id: &str, result: serde_json::Value) -> Result<JobRecord, JobError> {
            self.inner.complete(run_id, result)
        }

        fn fail(&self, run_id: &str, code: &str, message: &str) -> Result<JobRecord, JobError> {
            self.inner.fail(run_id, code, message)
        }

        fn cancel(&self, run_id: &str) -> Result<JobRecord, JobError> {
            self.inner.cancel(run_id)
        }

        fn requeue_running(&self, processor: &str) -> Result<usize, JobError> {
            self.inner.requeue_running(processor)
        }

        fn job_ids_by_data(&self, field: &str, value: &str) -> Result<Vec<String>, JobError> {
            self.inner.job_ids_by_data(field, value)
        }

        fn purge(&self, job_ids: &[String]) -> Result<usize, JobError> {
            self.inner.purge(job_ids)
        }
    }

    /// Drives a job through claim and success.
    fn succeed(jobs: &Arc<dyn JobStore>, processor: &str) -> JobRecord {
        let job = jobs.claim_next(processor).unwrap().unwrap();
        jobs.complete(&job.run_id, serde_json::json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_single_archive_url_creates_gated_extract() {
        let h = harness();
        let release = fixtures::release("rel-1");

        let created = h.pipeline.add_release(&release).await.unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(created[0].processor, DOWNLOAD_PROCESSOR);
        assert_eq!(created[0].state, JobState::Runnable);
        assert_eq!(created[1].processor, EXTRACT_PROCESSOR);
        assert_eq!(created[1].state, JobState::Gated);
        assert!(h.paths.release_staging_dir("rel-1").is_dir());

        let extract: ExtractJobData = decode(&created[1]).unwrap();
        assert_eq!(
            extract.archive_path,
            h.paths.release_staging_dir("rel-1").join("rel-1.zip")
        );

        let done = succeed(&h.jobs, DOWNLOAD_PROCESSOR);
        assert_eq!(h.pipeline.on_job_succeeded(&done).unwrap(), 1);
        assert_eq!(
            h.jobs.get(&created[1].run_id).unwrap().unwrap().state,
            JobState::Runnable
        );
    }

    #[tokio::test]
    async fn test_multi_part_archive_waits_for_every_part() {
        let h = harness();
        let release = fixtures::release_with_assets(
            "rel-1",
            vec![fixtures::archive_asset(
                "asset-1",
                &[
                    "https://example.com/pack.7z.001",
                    "https://example.com/pack.7z.002",
                ],
            )],
        );

        let created = h.pipeline.add_release(&release).await.unwrap();
        assert_eq!(created.len(), 3);
        let extract: ExtractJobData = decode(&created[2]).unwrap();
        assert!(extract.archive_path.ends_with("pack.7z.001"));

        let first = succeed(&h.jobs, DOWNLOAD_PROCESSOR);
        assert_eq!(h.pipeline.on_job_succeeded(&first).unwrap(), 0);
        let second = succeed(&h.jobs, DOWNLOAD_PROCESSOR);
        assert_eq!(h.pipeline.on_job_succeeded(&second).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_archive_without_urls_has_no_extract_job() {
        let h = harness();
        let release = fixtures::release_with_assets(
            "rel-1",
            vec![
                fixtures::archive_asset("asset-1", &[]),
                fixtures::file_asset("asset-2", "https://example.com/readme.txt"),
            ],
        );

        let created = h.pipeline.add_release(&release).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].processor, DOWNLOAD_PROCESSOR);
    }

    #[tokio::test]
    async fn test_invalid_url_rejects_release() {
        let h = harness();
        let release = fixtures::release_with_assets(
            "rel-1",
            vec![fixtures::file_asset("asset-1", "ftp://example.com/a.zip")],
        );

        let result = h.pipeline.add_release(&release).await;
        assert!(matches!(result, Err(PipelineError::InvalidAsset { .. })));
        assert!(h.pipeline.releases().get("rel-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extract_success_does_not_unblock() {
        let h = harness();
        h.pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();
        succeed(&h.jobs, DOWNLOAD_PROCESSOR);
        h.pipeline.reconcile().unwrap();

        let extract = succeed(&h.jobs, EXTRACT_PROCESSOR);
        assert_eq!(h.pipeline.on_job_succeeded(&extract).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_follows_jobs() {
        let h = harness();
        h.pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        let status = h.pipeline.get_release_with_status("rel-1").unwrap().unwrap();
        assert_eq!(status.status, ReleaseStatus::Pending);
        assert_eq!(status.assets[0].status, AssetStatus::Pending);
        assert_eq!(status.progress, 0.0);

        let done = succeed(&h.jobs, DOWNLOAD_PROCESSOR);
        h.pipeline.on_job_succeeded(&done).unwrap();
        let status = h.pipeline.get_release_with_status("rel-1").unwrap().unwrap();
        assert_eq!(status.status, ReleaseStatus::InProgress);
        assert_eq!(status.assets[0].download_progress, 100.0);
        assert_eq!(status.assets[0].extract_progress, 0.0);
        assert_eq!(status.assets[0].progress, 50.0);

        succeed(&h.jobs, EXTRACT_PROCESSOR);
        let status = h.pipeline.get_release_with_status("rel-1").unwrap().unwrap();
        assert_eq!(status.assets[0].status, AssetStatus::Completed);
        // Completed but not linked yet
        assert_eq!(status.status, ReleaseStatus::Disabled);
        assert_eq!(status.progress, 100.0);
    }

    #[tokio::test]
    async fn test_failed_download_is_error() {
        let h = harness();
        h.pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        let job = h.jobs.claim_next(DOWNLOAD_PROCESSOR).unwrap().unwrap();
        h.jobs.fail(&job.run_id, "PROCESS_ERROR", "exit 4").unwrap();

        let all = h.pipeline.get_all_releases_with_status().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ReleaseStatus::Error);
        assert_eq!(all[0].assets[0].status, AssetStatus::Error);
    }

    #[tokio::test]
    async fn test_readiness() {
        let h = harness();
        h.pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        // Extract is gated
        assert!(!h.pipeline.is_release_ready("rel-1").unwrap());
        assert_eq!(
            h.pipeline
                .stage_readiness("rel-1")
                .unwrap()
                .incomplete_stage(),
            Some(Stage::Download)
        );

        let done = succeed(&h.jobs, DOWNLOAD_PROCESSOR);
        h.pipeline.on_job_succeeded(&done).unwrap();
        // Runnable extract does not count as not-ready
        assert!(h.pipeline.is_release_ready("rel-1").unwrap());
        assert_eq!(
            h.pipeline
                .stage_readiness("rel-1")
                .unwrap()
                .incomplete_stage(),
            Some(Stage::Extract)
        );

        succeed(&h.jobs, EXTRACT_PROCESSOR);
        assert_eq!(
            h.pipeline
                .stage_readiness("rel-1")
                .unwrap()
                .incomplete_stage(),
            None
        );
    }

    #[tokio::test]
    async fn test_remove_release_cancels_and_is_idempotent() {
        let h = harness();
        let created = h
            .pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();
        let staging = h.paths.release_staging_dir("rel-1");

        h.pipeline.remove_release("rel-1").await.unwrap();
        for job in &created {
            assert_eq!(
                h.jobs.get(&job.run_id).unwrap().unwrap().state,
                JobState::Cancelled
            );
        }
        assert!(!staging.exists());
        assert!(h.pipeline.releases().release_job_ids("rel-1").unwrap().is_empty());

        h.pipeline.remove_release("rel-1").await.unwrap();
        for job in &created {
            assert_eq!(
                h.jobs.get(&job.run_id).unwrap().unwrap().state,
                JobState::Cancelled
            );
        }
    }

    #[tokio::test]
    async fn test_remove_release_keeps_succeeded_jobs() {
        let h = harness();
        let created = h
            .pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();
        succeed(&h.jobs, DOWNLOAD_PROCESSOR);

        h.pipeline.remove_release("rel-1").await.unwrap();
        assert_eq!(
            h.jobs.get(&created[0].run_id).unwrap().unwrap().state,
            JobState::Succeeded
        );
        assert_eq!(
            h.jobs.get(&created[1].run_id).unwrap().unwrap().state,
            JobState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_delete_release_purges_everything() {
        let h = harness();
        let created = h
            .pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        h.pipeline.delete_release("rel-1").await.unwrap();

        assert!(h.pipeline.releases().get("rel-1").unwrap().is_none());
        assert!(h.jobs.get(&created[0].run_id).unwrap().is_none());
        assert!(matches!(
            h.pipeline.delete_release("rel-1").await,
            Err(PipelineError::ReleaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_after_remove_purges_jobs() {
        let h = harness();
        let created = h
            .pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        h.pipeline.remove_release("rel-1").await.unwrap();
        h.pipeline.delete_release("rel-1").await.unwrap();

        for job in &created {
            assert!(h.jobs.get(&job.run_id).unwrap().is_none());
        }
        assert!(h.pipeline.releases().get("rel-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_downloads_done_during_add_still_unblock() {
        let h = harness_with(Arc::new(EagerDownloads::new(false)), Vec::new());
        let release = fixtures::release_with_assets(
            "rel-1",
            vec![
                fixtures::archive_asset("asset-1", &["https://example.com/a.zip"]),
                fixtures::archive_asset("asset-2", &["https://example.com/b.zip"]),
            ],
        );

        let created = h.pipeline.add_release(&release).await.unwrap();

        let processors: Vec<_> = created.iter().map(|job| job.processor.as_str()).collect();
        assert_eq!(
            processors,
            vec![
                DOWNLOAD_PROCESSOR,
                DOWNLOAD_PROCESSOR,
                EXTRACT_PROCESSOR,
                EXTRACT_PROCESSOR
            ]
        );
        for extract in &created[2..] {
            assert_eq!(
                h.jobs.get(&extract.run_id).unwrap().unwrap().state,
                JobState::Runnable
            );
        }
    }

    #[tokio::test]
    async fn test_partial_add_can_be_removed() {
        let h = harness_with(Arc::new(EagerDownloads::new(true)), Vec::new());

        let result = h.pipeline.add_release(&fixtures::release("rel-1")).await;
        assert!(matches!(result, Err(PipelineError::Scheduler(_))));

        // The download created before the failure is tracked
        let job_ids = h.pipeline.releases().release_job_ids("rel-1").unwrap();
        assert_eq!(job_ids.len(), 1);

        h.pipeline.delete_release("rel-1").await.unwrap();
        assert!(h.jobs.latest(&job_ids[0]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_release_waits_for_cancelled_runs() {
        let downloads = MockProcessor::new(DOWNLOAD_PROCESSOR);
        downloads.push_wait_for_cancel().await;
        let h = harness_with(
            Arc::new(SqliteJobStore::in_memory().unwrap()),
            vec![downloads.clone()],
        );
        let created = h
            .pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        let runner = {
            let scheduler = Arc::clone(h.pipeline.scheduler());
            tokio::spawn(async move { scheduler.run_once(DOWNLOAD_PROCESSOR).await })
        };
        while downloads.max_in_flight().await == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        h.pipeline.remove_release("rel-1").await.unwrap();

        assert!(
            h.pipeline
                .scheduler()
                .wait_inactive(&created[0].run_id, std::time::Duration::ZERO)
                .await
        );
        assert!(!h.paths.release_staging_dir("rel-1").exists());
        let done = runner.await.unwrap().unwrap().unwrap();
        assert_eq!(done.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_event_listener_unblocks_extracts() {
        let h = harness();
        let created = h
            .pipeline
            .add_release(&fixtures::release("rel-1"))
            .await
            .unwrap();

        // Download finished before the listener started
        succeed(&h.jobs, DOWNLOAD_PROCESSOR);

        let shutdown = CancellationToken::new();
        let listener = h.pipeline.spawn_event_listener(shutdown.clone());

        let extract_run = created[1].run_id.clone();
        for _ in 0..100 {
            if h.jobs.get(&extract_run).unwrap().unwrap().state == JobState::Runnable {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            h.jobs.get(&extract_run).unwrap().unwrap().state,
            JobState::Runnable
        );

        shutdown.cancel();
        listener.await.unwrap();
    }
}
