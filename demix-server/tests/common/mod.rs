//! Shared fixtures for integration tests.
//!
//! The fake separator decides what to do from the tag embedded in the input
//! file: tags containing `fail`, `block` or `noartifacts` change its behavior,
//! anything else succeeds after a short delay.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use demix_server::database::{SqlxJobRepository, init_pool, run_migrations};
use demix_server::domain::{Job, JobStatus, VideoMetadata};
use demix_server::intake::AudioIntakeValidator;
use demix_server::jobs::{
    CoordinatorConfig, ExecutionCoordinator, JobContext, JobService, OutputLayout, ServiceConfig,
};
use demix_server::retrieval::{ContentRetriever, PlaylistEntry, PlaylistListing, youtube};
use demix_server::separation::{SeparationOutcome, SeparationRequest, Separator};
use demix_server::{Error, Result};

const ID3_HEADER: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00";

/// A tiny MP3-looking payload carrying `tag`.
pub fn mp3(tag: &str) -> Vec<u8> {
    let mut bytes = ID3_HEADER.to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

fn read_tag(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap_or_default();
    let body = bytes.strip_prefix(ID3_HEADER).unwrap_or(&bytes);
    String::from_utf8_lossy(body).into_owned()
}

#[derive(Default)]
pub struct FakeSeparator {
    executed: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    /// Progress lines printed before the stems are written.
    lines: Mutex<Vec<String>>,
}

impl FakeSeparator {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(vec![
                "Selected model is a bag of 1 models.".to_string(),
                " 25%|██▌       | 29.25/117.0".to_string(),
                " 60%|██████    | 70.2/117.0".to_string(),
                "100%|██████████| 117.0/117.0".to_string(),
            ]),
            ..Default::default()
        }
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        let separator = Self::new();
        *separator.lines.lock() = lines.iter().map(|l| l.to_string()).collect();
        separator
    }

    /// Tags of every input the separator was started on, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn write_stems(request: &SeparationRequest) -> Result<()> {
        let track_dir = request
            .output_dir
            .join(request.model.as_str())
            .join("source");
        tokio::fs::create_dir_all(&track_dir).await?;
        for stem in request.model.stems() {
            let path = track_dir.join(format!(
                "{}.{}",
                stem.as_str(),
                request.output_format.extension()
            ));
            tokio::fs::write(&path, b"stem audio").await?;
        }
        Ok(())
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Separator for FakeSeparator {
    async fn separate(
        &self,
        request: &SeparationRequest,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<SeparationOutcome> {
        let tag = read_tag(&request.input);
        self.executed.lock().push(tag.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let script = self.lines.lock().clone();
        for line in script {
            if lines.send(line).await.is_err() {
                break;
            }
        }

        if tag.contains("block") {
            cancel.cancelled().await;
            return Ok(SeparationOutcome::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(SeparationOutcome::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        if tag.contains("fail") {
            return Err(Error::Separation("exit status: 1".into()));
        }
        if !tag.contains("noartifacts") {
            Self::write_stems(request).await?;
        }
        Ok(SeparationOutcome::Finished)
    }
}

/// Retriever serving canned metadata. `LongVideo00` runs an hour, everything
/// else a few minutes.
///
/// Downloads of ids starting with `block` wait for cancellation. Ids starting
/// with `hold` ignore the cancel token and wait for [`FakeRetriever::release`].
#[derive(Default)]
pub struct FakeRetriever {
    downloads: Mutex<Vec<String>>,
    gate: Notify,
}

impl FakeRetriever {
    fn metadata(video_id: &str) -> VideoMetadata {
        VideoMetadata {
            id: video_id.to_string(),
            title: format!("Video {}", video_id),
            duration_secs: if video_id == "LongVideo00" { 3600 } else { 180 },
            url: youtube::watch_url(video_id),
            ..Default::default()
        }
    }
}

impl FakeRetriever {
    /// Video ids whose download has started, in order.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }

    /// Let one held download finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ContentRetriever for FakeRetriever {
    async fn resolve(&self, url: &str) -> Result<VideoMetadata> {
        let id = youtube::extract_video_id(url)
            .ok_or_else(|| Error::Retrieval(format!("not a video: {}", url)))?;
        Ok(Self::metadata(&id))
    }

    async fn list_playlist(&self, _url: &str) -> Result<PlaylistListing> {
        Ok(PlaylistListing {
            id: "PLmix".into(),
            title: Some("Mix".into()),
            entries: vec![
                PlaylistEntry {
                    video_id: "shortvideo1".into(),
                    title: Some("Short".into()),
                    duration_secs: Some(180),
                },
                PlaylistEntry {
                    video_id: "LongVideo00".into(),
                    title: Some("Long".into()),
                    duration_secs: None,
                },
            ],
        })
    }

    async fn download(
        &self,
        url: &str,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let id = youtube::extract_video_id(url).unwrap_or_default();
        self.downloads.lock().push(id.clone());

        if id.starts_with("block") {
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }
        if id.starts_with("hold") {
            self.gate.notified().await;
        }

        let path = target_dir.join("source.mp3");
        tokio::fs::write(&path, mp3(&id)).await?;
        Ok(path)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub ctx: JobContext,
    pub service: JobService,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub separator: Arc<FakeSeparator>,
    pub retriever: Arc<FakeRetriever>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    /// Fresh database and job directory with a running coordinator.
    pub async fn start() -> Self {
        Self::start_with(FakeSeparator::new()).await
    }

    pub async fn start_with(separator: FakeSeparator) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut harness = Self::open(dir, Arc::new(separator)).await;
        harness.run();
        harness
    }

    /// Build the services over an existing directory without starting the loop.
    pub async fn open(dir: TempDir, separator: Arc<FakeSeparator>) -> Self {
        let url = format!("sqlite:{}", dir.path().join("jobs.db").display());
        let pool = init_pool(&url).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");

        let ctx = JobContext::new(
            Arc::new(SqlxJobRepository::new(pool)),
            OutputLayout::new(dir.path().join("jobs")),
        );
        let retriever = Arc::new(FakeRetriever::default());
        let coordinator = Arc::new(ExecutionCoordinator::new(
            CoordinatorConfig::default().with_poll_interval(Duration::from_millis(10)),
            ctx.clone(),
            separator.clone(),
            retriever.clone(),
        ));
        let service = JobService::new(
            ServiceConfig::default().with_download_cleanup_delay(Duration::ZERO),
            ctx.clone(),
            coordinator.clone(),
            Arc::new(AudioIntakeValidator::default()),
            retriever.clone(),
        );

        Self {
            dir,
            ctx,
            service,
            coordinator,
            separator,
            retriever,
            handle: None,
        }
    }

    pub fn run(&mut self) {
        if self.handle.is_none() {
            self.handle = Some(self.coordinator.start());
        }
    }

    /// Stop the coordinator and hand back the directory for a restart.
    pub async fn stop(mut self) -> TempDir {
        self.coordinator.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.dir
    }

    /// Poll until the coordinator holds `job_id`'s execution claim.
    pub async fn wait_for_claim(&self, job_id: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.coordinator.current_job().as_deref() != Some(job_id) {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for job {} to be claimed", job_id);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until the job reaches `status`, panicking after a few seconds.
    pub async fn wait_for(&self, job_id: &str, status: JobStatus) -> Job {
        self.wait_until(job_id, |job| job.status == status).await
    }

    pub async fn wait_until(&self, job_id: &str, done: impl Fn(&Job) -> bool) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(job) = self.service.get(job_id)
                && done(&job)
            {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for job {}: {:?}",
                    job_id,
                    self.service.get(job_id).map(|j| j.status)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
