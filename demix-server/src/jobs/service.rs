//! Transport-facing job operations.
//!
//! The service admits work (uploads, single videos, playlists), answers
//! queries from the in-memory store and performs the user-driven mutations
//! (cancel, delete, refresh, download packaging). It never waits on
//! execution; the coordinator picks admitted jobs up on its own.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::JobContext;
use super::cache::ResultCache;
use super::coordinator::ExecutionCoordinator;
use super::events::JobEvent;
use crate::domain::{
    Fingerprint, Job, JobStatus, OutputFormat, PlaylistRef, ProcessingParams, SeparationModel,
    SourceDescriptor, Stem, StemSelection, VideoMetadata,
};
use crate::intake::IntakeValidator;
use crate::retrieval::{ContentRetriever, youtube};
use crate::separation::{ArchiveEntry, build_archive};
use crate::utils::filename::{sanitize_filename, strip_extension};
use crate::utils::fs;
use crate::{Error, Result};

const MAX_RECENT_LIMIT: usize = 100;
const MAX_LIBRARY_PAGE_SIZE: usize = 300;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Longest external source accepted at submission, in seconds.
    pub max_source_duration_secs: u64,
    /// Delay before a downloaded job is removed. Zero keeps it until retention.
    pub download_cleanup_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_source_duration_secs: 600,
            download_cleanup_delay: Duration::from_secs(300),
        }
    }
}

impl ServiceConfig {
    pub fn with_max_source_duration_secs(mut self, secs: u64) -> Self {
        self.max_source_duration_secs = secs;
        self
    }

    pub fn with_download_cleanup_delay(mut self, delay: Duration) -> Self {
        self.download_cleanup_delay = delay;
        self
    }
}

/// Result of admitting one piece of content.
#[derive(Debug, Clone)]
pub struct Admission {
    pub job: Job,
    /// `true` when an earlier completed job answers the request.
    pub cached: bool,
    /// Stems this requester asked for. A cached job may have been run for a
    /// different selection, so downloads package this one.
    pub stems: StemSelection,
}

impl Admission {
    fn new(job: Job, cached: bool, stems: StemSelection) -> Self {
        Self { job, cached, stems }
    }
}

#[derive(Debug, Clone)]
pub enum YoutubeAdmission {
    Video(Admission),
    Playlist {
        playlist_id: String,
        title: Option<String>,
        total_videos: usize,
        admissions: Vec<Admission>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still waiting and is now cancelled.
    Cancelled,
    /// The job is running; the coordinator was asked to stop it.
    Requested,
}

#[derive(Debug, Clone)]
pub struct JobView {
    pub job: Job,
    /// 1-based position among waiting jobs.
    pub queue_position: Option<usize>,
    pub processing_time_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub active: usize,
    pub queued: usize,
}

#[derive(Debug, Clone)]
pub struct LibraryPage {
    pub jobs: Vec<Job>,
    pub page: usize,
    pub page_size: usize,
    pub total_jobs: usize,
    pub total_pages: usize,
}

/// A ZIP ready to be streamed to a client.
#[derive(Debug, Clone)]
pub struct PreparedArchive {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Clone)]
pub struct JobService {
    ctx: JobContext,
    cache: Arc<ResultCache>,
    coordinator: Arc<ExecutionCoordinator>,
    intake: Arc<dyn IntakeValidator>,
    retriever: Arc<dyn ContentRetriever>,
    config: ServiceConfig,
    /// Jobs with a post-download cleanup timer already running.
    pending_cleanups: Arc<Mutex<HashSet<String>>>,
}

impl JobService {
    pub fn new(
        config: ServiceConfig,
        ctx: JobContext,
        coordinator: Arc<ExecutionCoordinator>,
        intake: Arc<dyn IntakeValidator>,
        retriever: Arc<dyn ContentRetriever>,
    ) -> Self {
        let cache = ResultCache::new(ctx.store.clone(), ctx.layout.clone())
            .with_repository(ctx.repository.clone());
        Self {
            ctx,
            cache: Arc::new(cache),
            coordinator,
            intake,
            retriever,
            config,
            pending_cleanups: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    // ========== Admission ==========

    /// Admit uploaded audio, or answer from the cache.
    pub async fn submit_upload(
        &self,
        filename: &str,
        bytes: &[u8],
        params: ProcessingParams,
    ) -> Result<Admission> {
        params.validate()?;
        self.intake.validate(filename, bytes)?;

        let fingerprint = Fingerprint::of_bytes(bytes);
        if let Some(job) = self.cache.lookup(&fingerprint, &params).await {
            info!(job_id = %job.id, filename = %filename, stems = %params.stems, "Upload served from cache");
            return Ok(Admission::new(job, true, params.stems));
        }

        let source = SourceDescriptor::Upload {
            filename: sanitize_filename(filename),
            sha256: fingerprint.value().to_string(),
            size_bytes: bytes.len() as u64,
        };
        let job = self.register(fingerprint, source, params);

        if let Err(e) = self.ctx.layout.write_input(&job, bytes).await {
            self.discard_registration(&job.id).await;
            return Err(e);
        }

        self.enqueue(&job).await;
        info!(job_id = %job.id, filename = %filename, size_bytes = bytes.len(), "Upload admitted");
        Ok(Admission::new(job, false, params.stems))
    }

    /// Admit a video or every entry of a playlist.
    pub async fn submit_youtube(
        &self,
        url: &str,
        params: ProcessingParams,
    ) -> Result<YoutubeAdmission> {
        params.validate()?;
        let url = url.trim();
        if !youtube::is_youtube_url(url) {
            return Err(Error::validation("Invalid YouTube URL"));
        }

        if youtube::is_playlist_url(url) {
            return self.submit_playlist(url, params).await;
        }

        let video_id = youtube::extract_video_id(url)
            .ok_or_else(|| Error::validation("Could not find a video id in the URL"))?;
        let fingerprint = Fingerprint::youtube(&video_id);
        if let Some(job) = self.cache.lookup(&fingerprint, &params).await {
            info!(job_id = %job.id, video_id = %video_id, stems = %params.stems, "Video served from cache");
            return Ok(YoutubeAdmission::Video(Admission::new(
                job,
                true,
                params.stems,
            )));
        }

        let metadata = self.retriever.resolve(url).await?;
        if metadata.duration_secs > self.config.max_source_duration_secs {
            return Err(Error::SourceTooLong {
                limit_secs: self.config.max_source_duration_secs,
                actual_secs: metadata.duration_secs,
            });
        }

        let job = self.admit_video(&video_id, url, Some(metadata), None, params).await;
        info!(job_id = %job.id, video_id = %video_id, title = %job.source.display_name(), "Video admitted");
        Ok(YoutubeAdmission::Video(Admission::new(
            job,
            false,
            params.stems,
        )))
    }

    async fn submit_playlist(&self, url: &str, params: ProcessingParams) -> Result<YoutubeAdmission> {
        let listing = self.retriever.list_playlist(url).await?;
        let total = listing.entries.len();
        let mut admissions = Vec::with_capacity(total);

        for (idx, entry) in listing.entries.iter().enumerate() {
            let fingerprint = Fingerprint::youtube(&entry.video_id);
            if let Some(job) = self.cache.lookup(&fingerprint, &params).await {
                admissions.push(Admission::new(job, true, params.stems));
                continue;
            }

            let playlist = PlaylistRef {
                playlist_id: listing.id.clone(),
                title: listing.title.clone(),
                position: idx as u32 + 1,
                total: total as u32,
            };
            // Metadata and the duration limit are resolved when the job runs.
            let job = self
                .admit_video(
                    &entry.video_id,
                    &youtube::watch_url(&entry.video_id),
                    None,
                    Some(playlist),
                    params,
                )
                .await;
            admissions.push(Admission::new(job, false, params.stems));
        }

        let cached = admissions.iter().filter(|a| a.cached).count();
        info!(
            playlist_id = %listing.id,
            total_videos = total,
            created = total - cached,
            cached,
            "Playlist admitted"
        );

        Ok(YoutubeAdmission::Playlist {
            playlist_id: listing.id,
            title: listing.title,
            total_videos: total,
            admissions,
        })
    }

    async fn admit_video(
        &self,
        video_id: &str,
        url: &str,
        metadata: Option<VideoMetadata>,
        playlist: Option<PlaylistRef>,
        params: ProcessingParams,
    ) -> Job {
        let duration = metadata.as_ref().map(|m| m.duration_secs);
        let source = SourceDescriptor::Youtube {
            video_id: video_id.to_string(),
            url: url.to_string(),
            metadata,
            playlist,
        };
        let mut job = self.register(Fingerprint::youtube(video_id), source, params);
        if let Some(duration) = duration
            && let Ok(updated) = self.ctx.store.modify(&job.id, &mut |j| {
                j.duration_secs = Some(duration);
                Ok(())
            })
        {
            job = updated;
        }
        self.enqueue(&job).await;
        job
    }

    /// Insert a new queued job under the content's preferred id, or a fresh
    /// one when that id is taken.
    fn register(
        &self,
        fingerprint: Fingerprint,
        source: SourceDescriptor,
        params: ProcessingParams,
    ) -> Job {
        let preferred = Job::new(
            fingerprint.preferred_job_id(),
            fingerprint.clone(),
            source.clone(),
            params,
        );
        if self.ctx.store.insert_new(preferred.clone()) {
            return preferred;
        }
        loop {
            let job = Job::new(
                uuid::Uuid::new_v4().to_string(),
                fingerprint.clone(),
                source.clone(),
                params,
            );
            if self.ctx.store.insert_new(job.clone()) {
                return job;
            }
        }
    }

    async fn enqueue(&self, job: &Job) {
        self.ctx.persist(job).await;
        self.ctx.queue.enqueue(job.id.clone());
        self.ctx
            .events
            .publish(JobEvent::progress(job, "Waiting in queue"));
        debug!(job_id = %job.id, queue_len = self.ctx.queue.len(), "Job enqueued");
    }

    // ========== Queries ==========

    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.ctx
            .store
            .get(job_id)
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    pub fn view(&self, job_id: &str) -> Result<JobView> {
        let job = self.get(job_id)?;
        let queue_position = match job.status {
            JobStatus::Queued => self.queue_position(job_id),
            _ => None,
        };
        let processing_time_secs = job.processing_time_secs();
        Ok(JobView {
            job,
            queue_position,
            processing_time_secs,
        })
    }

    /// Position among jobs still waiting, 1-based.
    pub fn queue_position(&self, job_id: &str) -> Option<usize> {
        let waiting: Vec<Job> = {
            let mut jobs: Vec<Job> = self
                .ctx
                .store
                .list()
                .into_iter()
                .filter(|j| j.status == JobStatus::Queued)
                .collect();
            jobs.sort_by_key(|j| self.ctx.queue.position(&j.id).unwrap_or(usize::MAX));
            jobs
        };
        waiting.iter().position(|j| j.id == job_id).map(|p| p + 1)
    }

    /// Newest jobs first, at most 100.
    pub fn list_recent(&self, limit: usize) -> Vec<Job> {
        let mut jobs = self.ctx.store.list();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.clamp(1, MAX_RECENT_LIMIT));
        jobs
    }

    /// One page of all jobs, newest first. Pages are 1-based.
    pub fn library(&self, page: usize, page_size: usize) -> LibraryPage {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_LIBRARY_PAGE_SIZE);

        let mut jobs = self.ctx.store.list();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total_jobs = jobs.len();
        let total_pages = total_jobs.div_ceil(page_size);

        let jobs = jobs
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        LibraryPage {
            jobs,
            page,
            page_size,
            total_jobs,
            total_pages,
        }
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            active: self.ctx.store.count_by_status(JobStatus::Processing),
            queued: self.ctx.store.count_by_status(JobStatus::Queued),
        }
    }

    // ========== Mutations ==========

    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let mut outcome = CancelOutcome::Requested;
        let job = self.ctx.store.modify(job_id, &mut |j| match j.status {
            JobStatus::Queued => {
                j.cancel()?;
                outcome = CancelOutcome::Cancelled;
                Ok(())
            }
            JobStatus::Processing => {
                outcome = CancelOutcome::Requested;
                Ok(())
            }
            status => Err(Error::validation(format!(
                "Cannot cancel job with status {}",
                status
            ))),
        })?;

        match outcome {
            CancelOutcome::Cancelled => {
                self.ctx.queue.remove(job_id);
                // The coordinator may already be fetching this job's source.
                self.coordinator.request_cancel(job_id);
                self.ctx.persist(&job).await;
                self.ctx.events.publish(JobEvent::Cancelled {
                    job_id: job_id.to_string(),
                });
                info!(job_id = %job_id, "Queued job cancelled");
            }
            CancelOutcome::Requested => {
                if !self.coordinator.request_cancel(job_id) {
                    warn!(job_id = %job_id, "Processing job is not held by the coordinator");
                }
                info!(job_id = %job_id, "Cancellation requested");
            }
        }
        Ok(outcome)
    }

    /// Remove a job's record and files. Running jobs must be cancelled first.
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        let job = self.get(job_id)?;
        if job.status == JobStatus::Processing
            || self.coordinator.current_job().as_deref() == Some(job_id)
        {
            return Err(Error::validation(
                "Cannot delete a job that is processing. Cancel it first.",
            ));
        }
        if job.status == JobStatus::Queued {
            self.cancel(job_id).await?;
        }
        self.remove_job(job_id).await?;
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Re-run a finished job's source, optionally with new parameters.
    ///
    /// The old job's output is removed; its record stays. Unset overrides
    /// keep the old job's values.
    pub async fn refresh(
        &self,
        job_id: &str,
        model: Option<&str>,
        output_format: Option<&str>,
        stems: Option<&str>,
    ) -> Result<Admission> {
        let old = self.get(job_id)?;
        if !old.status.is_terminal() {
            return Err(Error::validation(format!(
                "Only finished jobs can be refreshed. Current status: {}",
                old.status
            )));
        }

        let params = ProcessingParams::new(
            override_or(model, old.params.model, SeparationModel::parse)?,
            override_or(output_format, old.params.output_format, OutputFormat::parse)?,
            override_or(stems, old.params.stems, StemSelection::parse)?,
        );
        params.validate()?;

        let old_input = self.ctx.layout.input_path(&old);
        if !old.source.is_youtube() && !fs::is_non_empty_file(&old_input).await {
            return Err(Error::validation("The original upload is no longer available"));
        }

        let job = self.register(old.fingerprint.clone(), old.source.clone(), params);
        if !job.source.is_youtube()
            && let Err(e) = fs::copy_file(&old_input, &self.ctx.layout.input_path(&job)).await
        {
            self.discard_registration(&job.id).await;
            return Err(e);
        }
        if let Err(e) = self.ctx.layout.clear_output(&old.id).await {
            warn!(job_id = %old.id, error = %e, "Failed to remove output of refreshed job");
        }

        self.enqueue(&job).await;
        info!(job_id = %job.id, previous_job_id = %old.id, model = %params.model, "Job refreshed");
        Ok(Admission::new(job, false, params.stems))
    }

    /// Undo a registration whose input could not be stored.
    async fn discard_registration(&self, job_id: &str) {
        self.ctx.store.delete(job_id);
        if let Err(e) = self.ctx.layout.remove_job_dir(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to remove directory of discarded job");
        }
    }

    // ========== Results ==========

    /// Package stems of a completed job.
    ///
    /// `stems` is the requester's selection; `None` falls back to the one the
    /// job was submitted with.
    pub async fn prepare_archive(
        &self,
        job_id: &str,
        stems: Option<StemSelection>,
    ) -> Result<PreparedArchive> {
        let job = self.completed(job_id)?;
        let params = ProcessingParams {
            stems: stems.unwrap_or(job.params.stems),
            ..job.params
        };
        params.validate()?;

        let ext = params.output_format.extension();
        let mut entries = Vec::new();
        for stem in params.selected_stems() {
            let source = self.ctx.layout.stem_path(&job, stem);
            if fs::is_non_empty_file(&source).await {
                entries.push(ArchiveEntry {
                    source,
                    name: format!("{}.{}", stem, ext),
                });
            }
        }
        if entries.is_empty() {
            return Err(Error::not_found("Output files", job_id));
        }

        self.ctx.layout.prepare_archive_dir(job_id).await?;
        let dest = self.ctx.layout.archive_path(job_id, params.stems);
        let archive_dest = dest.clone();
        let size_bytes = tokio::task::spawn_blocking(move || build_archive(&entries, &archive_dest))
            .await
            .map_err(|e| Error::Other(format!("Archive task failed: {}", e)))??;

        let file_name = format!(
            "{}_stems.zip",
            sanitize_filename(strip_extension(job.source.display_name()))
        );
        info!(job_id = %job_id, stems = %params.stems, size_bytes, "Archive prepared");
        self.schedule_cleanup(job_id);

        Ok(PreparedArchive {
            path: dest,
            file_name,
            size_bytes,
        })
    }

    /// Stems present on disk, in display order.
    pub async fn available_stems(&self, job_id: &str) -> Result<Vec<Stem>> {
        let job = self.completed(job_id)?;
        Ok(self.ctx.layout.available_stems(&job).await)
    }

    /// Path and encoding of one stem. `stem` may carry the file extension.
    pub async fn stem_file(&self, job_id: &str, stem: &str) -> Result<(PathBuf, OutputFormat)> {
        let job = self.completed(job_id)?;
        let name = strip_extension(stem).to_ascii_lowercase();
        let stem = Stem::from_str(&name)
            .ok()
            .filter(|s| job.params.model.stems().contains(s))
            .ok_or_else(|| Error::not_found("Stem", &name))?;

        let path = self.ctx.layout.stem_path(&job, stem);
        if !fs::is_non_empty_file(&path).await {
            return Err(Error::not_found("Stem", stem.as_str()));
        }
        Ok((path, job.params.output_format))
    }

    fn completed(&self, job_id: &str) -> Result<Job> {
        let job = self.get(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(Error::validation(format!(
                "Job is not completed yet. Current status: {}",
                job.status
            )));
        }
        Ok(job)
    }

    fn schedule_cleanup(&self, job_id: &str) {
        let delay = self.config.download_cleanup_delay;
        if delay.is_zero() {
            return;
        }
        if !self.pending_cleanups.lock().insert(job_id.to_string()) {
            trace!(job_id = %job_id, "Post-download cleanup already pending");
            return;
        }
        let service = self.clone();
        let job_id = job_id.to_string();
        debug!(job_id = %job_id, delay_secs = delay.as_secs(), "Scheduled post-download cleanup");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = service.remove_job(&job_id).await {
                warn!(job_id = %job_id, error = %e, "Post-download cleanup failed");
            }
            service.pending_cleanups.lock().remove(&job_id);
        });
    }

    // ========== Retention ==========

    /// Remove finished jobs whose completion is older than `max_age`.
    pub async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let running = self.coordinator.current_job();
        let expired: Vec<String> = self
            .ctx
            .store
            .list()
            .into_iter()
            .filter(|j| j.status.is_terminal())
            .filter(|j| j.completed_at.unwrap_or(j.created_at) < cutoff)
            .filter(|j| running.as_deref() != Some(j.id.as_str()))
            .map(|j| j.id)
            .collect();

        let mut removed = 0;
        for job_id in expired {
            match self.remove_job(&job_id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove expired job"),
            }
        }
        Ok(removed)
    }

    /// Rebuild the in-memory state from durable records at startup.
    pub async fn load_persisted(&self) -> Result<usize> {
        let discarded = self.ctx.repository.discard_unrecoverable().await?;
        let jobs = self.ctx.repository.load_recoverable_jobs().await?;
        let loaded = jobs.len();
        for job in jobs {
            self.ctx.store.put(job);
        }
        info!(loaded, discarded, "Loaded persisted jobs");
        Ok(loaded)
    }

    async fn remove_job(&self, job_id: &str) -> Result<()> {
        if let Some(job) = self.ctx.store.get(job_id)
            && job.status == JobStatus::Processing
        {
            debug!(job_id = %job_id, "Skipping removal of a processing job");
            return Ok(());
        }
        self.ctx.queue.remove(job_id);
        self.ctx.store.delete(job_id);
        if let Err(e) = self.ctx.repository.delete_job(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to delete job record");
        }
        self.ctx.layout.remove_job_dir(job_id).await
    }
}

fn override_or<T>(value: Option<&str>, current: T, parse: fn(&str) -> Result<T>) -> Result<T> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => parse(v),
        None => Ok(current),
    }
}
