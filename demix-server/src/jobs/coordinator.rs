//! Single-worker execution coordinator.
//!
//! Exactly one job holds the executing designation at a time. The control
//! loop picks the oldest queued job, drives it to a terminal state and only
//! then looks at the queue again.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::JobContext;
use super::events::JobEvent;
use super::progress::{
    DemucsProgressParser, ProgressBand, ProgressParser, ProgressStage, ProgressTracker,
};
use crate::domain::{Job, JobStatus, SourceDescriptor};
use crate::retrieval::{ContentRetriever, youtube};
use crate::separation::{SeparationOutcome, SeparationRequest, Separator};
use crate::utils::fs;
use crate::{Error, Result};

const LINE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Idle wait between queue checks when no admission wakes the loop.
    pub poll_interval: Duration,
    /// Longest external source accepted, in seconds.
    pub max_source_duration_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_source_duration_secs: 600,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_source_duration_secs(mut self, secs: u64) -> Self {
        self.max_source_duration_secs = secs;
        self
    }
}

struct Claim {
    job_id: String,
    cancel: CancellationToken,
}

/// Releases the designation however execution ends, including on panic.
struct ClaimGuard<'a> {
    coordinator: &'a ExecutionCoordinator,
    job_id: String,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(&self.job_id);
    }
}

pub struct ExecutionCoordinator {
    config: CoordinatorConfig,
    ctx: JobContext,
    separator: Arc<dyn Separator>,
    retriever: Arc<dyn ContentRetriever>,
    parser: Arc<dyn ProgressParser>,
    current: Mutex<Option<Claim>>,
    shutdown: CancellationToken,
}

impl ExecutionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        ctx: JobContext,
        separator: Arc<dyn Separator>,
        retriever: Arc<dyn ContentRetriever>,
    ) -> Self {
        Self {
            config,
            ctx,
            separator,
            retriever,
            parser: Arc::new(DemucsProgressParser),
            current: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_progress_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Take the executing designation for `job_id` if nobody holds it.
    pub fn try_claim(&self, job_id: &str) -> bool {
        let mut current = self.current.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(Claim {
            job_id: job_id.to_string(),
            cancel: self.shutdown.child_token(),
        });
        true
    }

    /// Drop the designation held by `job_id` and its queue entry.
    ///
    /// Safe to call when nothing is claimed or another job holds the claim.
    pub fn release(&self, job_id: &str) {
        {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(claim) if claim.job_id == job_id => *current = None,
                Some(claim) => {
                    debug!(job_id = %job_id, holder = %claim.job_id, "Release for a job that does not hold the claim");
                }
                None => {}
            }
        }
        self.ctx.queue.remove(job_id);
    }

    pub fn current_job(&self) -> Option<String> {
        self.current.lock().as_ref().map(|c| c.job_id.clone())
    }

    pub fn is_idle(&self) -> bool {
        self.current.lock().is_none()
    }

    /// Ask the running job to stop. Returns `false` if `job_id` is not running.
    pub fn request_cancel(&self, job_id: &str) -> bool {
        let current = self.current.lock();
        match current.as_ref() {
            Some(claim) if claim.job_id == job_id => {
                claim.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn claim_token(&self, job_id: &str) -> Option<CancellationToken> {
        self.current
            .lock()
            .as_ref()
            .filter(|c| c.job_id == job_id)
            .map(|c| c.cancel.clone())
    }

    /// Spawn the control loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run().await })
    }

    /// Stop the loop; a running job is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Execution coordinator started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let Some(job_id) = self.ctx.queue.peek_next_queued(self.ctx.store.as_ref()) else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.ctx.queue.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            if !self.try_claim(&job_id) {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }
            let _guard = ClaimGuard {
                coordinator: self,
                job_id: job_id.clone(),
            };
            let Some(cancel) = self.claim_token(&job_id) else {
                continue;
            };
            self.execute(&job_id, &cancel).await;
        }

        info!("Execution coordinator stopped");
    }

    /// Drive one claimed job to a terminal state.
    async fn execute(&self, job_id: &str, cancel: &CancellationToken) {
        let Some(job) = self.ctx.store.get(job_id) else {
            warn!(job_id = %job_id, "Claimed job no longer exists");
            return;
        };
        if job.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %job.status, "Skipping job that is no longer queued");
            return;
        }

        info!(
            job_id = %job_id,
            source = %job.source.display_name(),
            model = %job.params.model,
            format = %job.params.output_format,
            "Starting job"
        );

        match self.run_job(job, cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => self.finish_cancelled(job_id).await,
            Err(e) => self.finish_failed(job_id, e.to_string()).await,
        }
    }

    async fn run_job(&self, job: Job, cancel: &CancellationToken) -> Result<()> {
        let input = self.resolve_source(&job, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let started = self.ctx.store.modify(&job.id, &mut |j| {
            j.start()?;
            j.set_stage(ProgressStage::Loading.as_str());
            Ok(())
        });
        let job = match started {
            Ok(job) => job,
            Err(e) => {
                // Cancelled while the source was being fetched.
                return match self.ctx.store.get(&job.id) {
                    Some(current) if current.status == JobStatus::Cancelled => {
                        Err(Error::Cancelled)
                    }
                    _ => Err(e),
                };
            }
        };
        self.ctx.persist(&job).await;
        self.ctx
            .events
            .publish(JobEvent::progress(&job, "Processing started"));

        let request = SeparationRequest {
            input,
            output_dir: self.ctx.layout.output_dir(&job.id),
            model: job.params.model,
            output_format: job.params.output_format,
        };

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (outcome, ()) = tokio::join!(
            self.separator.separate(&request, tx, cancel.clone()),
            self.consume_output(&job.id, rx),
        );
        if outcome? == SeparationOutcome::Cancelled {
            return Err(Error::Cancelled);
        }

        self.report_stage(&job.id, ProgressStage::Finalizing, ProgressBand::FINALIZE.start)
            .await;
        let missing = self.ctx.layout.missing_artifacts(&job).await;
        if !missing.is_empty() {
            return Err(Error::MissingArtifacts(missing));
        }

        let job = self.ctx.store.modify(&job.id, &mut |j| j.complete())?;
        self.ctx.persist(&job).await;
        info!(
            job_id = %job.id,
            processing_time_secs = job.processing_time_secs().unwrap_or_default(),
            "Job completed"
        );
        self.ctx.events.publish(JobEvent::Completed {
            job_id: job.id.clone(),
            processing_time_secs: job.processing_time_secs(),
        });
        Ok(())
    }

    /// Make the job's audio available locally and return its path.
    async fn resolve_source(&self, job: &Job, cancel: &CancellationToken) -> Result<PathBuf> {
        let (video_id, url, known) = match &job.source {
            SourceDescriptor::Upload { .. } => {
                let path = self.ctx.layout.input_path(job);
                if !fs::is_non_empty_file(&path).await {
                    return Err(Error::Other("Input file not found".to_string()));
                }
                return Ok(path);
            }
            SourceDescriptor::Youtube {
                video_id,
                url,
                metadata,
                ..
            } => (video_id.clone(), url.clone(), metadata.clone()),
        };

        self.ctx.events.publish(JobEvent::progress(
            job,
            ProgressStage::Retrieving.message(),
        ));

        let url = if url.is_empty() {
            youtube::watch_url(&video_id)
        } else {
            url
        };
        let metadata = match known {
            Some(metadata) => metadata,
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                resolved = self.retriever.resolve(&url) => resolved?,
            },
        };

        if metadata.duration_secs > self.config.max_source_duration_secs {
            return Err(Error::SourceTooLong {
                limit_secs: self.config.max_source_duration_secs,
                actual_secs: metadata.duration_secs,
            });
        }

        let duration = metadata.duration_secs;
        let updated = self.ctx.store.modify(&job.id, &mut |j| {
            j.source.set_metadata(metadata.clone());
            j.duration_secs = Some(duration);
            j.set_stage(ProgressStage::Retrieving.as_str());
            Ok(())
        })?;
        debug!(job_id = %job.id, title = %updated.source.display_name(), duration_secs = duration, "Resolved source");

        let target = self.ctx.layout.prepare_input_dir(&job.id).await?;
        self.retriever.download(&url, &target, cancel).await
    }

    /// Feed the tool's output through the progress parser until it closes.
    async fn consume_output(&self, job_id: &str, mut rx: mpsc::Receiver<String>) {
        let mut tracker = ProgressTracker::new(ProgressBand::TRANSFORM);

        while let Some(line) = rx.recv().await {
            trace!(job_id = %job_id, line = %line, "separator output");
            let Some(update) = self.parser.parse(&line) else {
                continue;
            };
            let percent = tracker.observe(&update);

            let mut stage_changed = false;
            let mut advanced = false;
            let updated = self.ctx.store.modify(job_id, &mut |j| {
                if let Some(stage) = update.stage {
                    stage_changed = j.set_stage(stage.as_str());
                }
                if let Some(p) = percent {
                    advanced = j.advance_progress(p);
                }
                Ok(())
            });
            let Ok(job) = updated else {
                continue;
            };

            if stage_changed || advanced {
                let message = update
                    .stage
                    .map(|s| s.message())
                    .unwrap_or("Processing");
                self.ctx.events.publish(JobEvent::progress(&job, message));
            }
            if stage_changed {
                self.ctx.persist(&job).await;
            }
        }
    }

    async fn report_stage(&self, job_id: &str, stage: ProgressStage, percent: u8) {
        let updated = self.ctx.store.modify(job_id, &mut |j| {
            j.set_stage(stage.as_str());
            j.advance_progress(percent);
            Ok(())
        });
        if let Ok(job) = updated {
            self.ctx.persist(&job).await;
            self.ctx
                .events
                .publish(JobEvent::progress(&job, stage.message()));
        }
    }

    async fn finish_cancelled(&self, job_id: &str) {
        let result = self.ctx.store.modify(job_id, &mut |j| {
            if j.status == JobStatus::Cancelled {
                Ok(())
            } else {
                j.cancel()
            }
        });
        match result {
            Ok(job) => {
                info!(job_id = %job_id, "Job cancelled");
                self.ctx.persist(&job).await;
                self.ctx.events.publish(JobEvent::Cancelled {
                    job_id: job_id.to_string(),
                });
                self.discard_output(job_id).await;
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Could not mark job cancelled"),
        }
    }

    async fn finish_failed(&self, job_id: &str, message: String) {
        error!(job_id = %job_id, error = %message, "Job failed");
        let result = self.ctx.store.modify(job_id, &mut |j| j.fail(message.clone()));
        match result {
            Ok(job) => {
                self.ctx.persist(&job).await;
                self.ctx.events.publish(JobEvent::Failed {
                    job_id: job_id.to_string(),
                    error: message,
                });
                self.discard_output(job_id).await;
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Could not mark job failed"),
        }
    }

    async fn discard_output(&self, job_id: &str) {
        if let Err(e) = self.ctx.layout.clear_output(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to remove partial output");
        }
    }
}
