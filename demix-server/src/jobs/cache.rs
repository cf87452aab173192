//! Content-addressed result cache.
//!
//! A prior job answers a new request only when it finished successfully for
//! the same content and compatible parameters, and its files are still on
//! disk. Nothing is trusted from the record alone.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::layout::OutputLayout;
use super::store::JobStore;
use crate::database::JobRepository;
use crate::domain::{Fingerprint, Job, JobStatus, ProcessingParams};

pub struct ResultCache {
    store: Arc<dyn JobStore>,
    layout: Arc<OutputLayout>,
    repository: Option<Arc<dyn JobRepository>>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn JobStore>, layout: Arc<OutputLayout>) -> Self {
        Self {
            store,
            layout,
            repository: None,
        }
    }

    /// Consult durable records keyed by external id when memory has no answer.
    pub fn with_repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Find a completed job whose artifacts can serve `params` for this content.
    pub async fn lookup(&self, fingerprint: &Fingerprint, params: &ProcessingParams) -> Option<Job> {
        let mut candidates: Vec<Job> = self
            .store
            .list()
            .into_iter()
            .filter(|job| Self::matches(job, fingerprint, params))
            .collect();
        // Most recent result first.
        candidates.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

        for job in candidates {
            if self.layout.artifacts_present(&job).await {
                debug!(job_id = %job.id, fingerprint = %fingerprint, "Cache hit");
                return Some(job);
            }
            info!(job_id = %job.id, "Cached result no longer on disk, ignoring it");
        }

        self.lookup_external(fingerprint, params).await
    }

    async fn lookup_external(
        &self,
        fingerprint: &Fingerprint,
        params: &ProcessingParams,
    ) -> Option<Job> {
        let repository = self.repository.as_ref()?;
        let external_id = fingerprint.external_id()?;

        let records = match repository.find_by_external_id(external_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(external_id = %external_id, error = %e, "External cache lookup failed");
                return None;
            }
        };

        for job in records {
            if !Self::matches(&job, fingerprint, params) || self.store.contains(&job.id) {
                continue;
            }
            if self.layout.artifacts_present(&job).await {
                debug!(job_id = %job.id, external_id = %external_id, "Cache hit from durable record");
                self.store.insert_new(job.clone());
                return Some(job);
            }
        }
        None
    }

    fn matches(job: &Job, fingerprint: &Fingerprint, params: &ProcessingParams) -> bool {
        job.status == JobStatus::Completed
            && &job.fingerprint == fingerprint
            && job.params.cache_compatible(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OutputFormat, SourceDescriptor, Stem, StemSelection};
    use crate::jobs::store::MemoryJobStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryJobStore>,
        layout: Arc<OutputLayout>,
        cache: ResultCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let layout = Arc::new(OutputLayout::new(dir.path()));
        let cache = ResultCache::new(store.clone(), layout.clone());
        Fixture {
            _dir: dir,
            store,
            layout,
            cache,
        }
    }

    fn completed_job(f: &Fixture, id: &str, bytes: &[u8], params: ProcessingParams) -> Job {
        let mut job = Job::new(
            id,
            Fingerprint::of_bytes(bytes),
            SourceDescriptor::Upload {
                filename: "song.mp3".into(),
                sha256: "x".into(),
                size_bytes: bytes.len() as u64,
            },
            params,
        );
        job.start().unwrap();
        job.complete().unwrap();
        std::fs::create_dir_all(f.layout.track_dir(&job)).unwrap();
        for path in f.layout.expected_artifacts(&job) {
            std::fs::write(path, b"stem").unwrap();
        }
        f.store.put(job.clone());
        job
    }

    #[tokio::test]
    async fn test_hit_requires_completed_job_and_artifacts() {
        let f = fixture();
        let params = ProcessingParams::default();
        let job = completed_job(&f, "a", b"song", params);

        let hit = f.cache.lookup(&Fingerprint::of_bytes(b"song"), &params).await;
        assert_eq!(hit.map(|j| j.id), Some(job.id.clone()));

        std::fs::remove_file(f.layout.stem_path(&job, Stem::Drums)).unwrap();
        assert!(f.cache.lookup(&Fingerprint::of_bytes(b"song"), &params).await.is_none());
    }

    #[tokio::test]
    async fn test_different_format_is_a_miss() {
        let f = fixture();
        completed_job(&f, "a", b"song", ProcessingParams::default());
        let wav = ProcessingParams {
            output_format: OutputFormat::Wav,
            ..Default::default()
        };
        assert!(f.cache.lookup(&Fingerprint::of_bytes(b"song"), &wav).await.is_none());
    }

    #[tokio::test]
    async fn test_stem_selection_does_not_affect_hits() {
        let f = fixture();
        completed_job(&f, "a", b"song", ProcessingParams::default());
        let vocals_only = ProcessingParams {
            stems: StemSelection::Only(Stem::Vocals),
            ..Default::default()
        };
        assert!(f.cache.lookup(&Fingerprint::of_bytes(b"song"), &vocals_only).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_jobs_never_hit() {
        let f = fixture();
        let mut job = completed_job(&f, "a", b"song", ProcessingParams::default());
        job.status = JobStatus::Failed;
        f.store.put(job);
        assert!(
            f.cache
                .lookup(&Fingerprint::of_bytes(b"song"), &ProcessingParams::default())
                .await
                .is_none()
        );
    }
}
