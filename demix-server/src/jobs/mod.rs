//! Job orchestration: admission, caching, single-worker execution and retention.

pub mod cache;
pub mod coordinator;
pub mod events;
pub mod layout;
pub mod progress;
pub mod purge;
pub mod queue;
pub mod service;
pub mod store;

pub use cache::ResultCache;
pub use coordinator::{CoordinatorConfig, ExecutionCoordinator};
pub use events::{EventBus, JobEvent};
pub use layout::OutputLayout;
pub use progress::{DemucsProgressParser, ProgressParser};
pub use purge::{RetentionConfig, RetentionSweeper};
pub use queue::AdmissionQueue;
pub use service::{
    Admission, CancelOutcome, JobCounts, JobService, JobView, LibraryPage, PreparedArchive,
    ServiceConfig, YoutubeAdmission,
};
pub use store::{JobStore, MemoryJobStore};

use std::sync::Arc;
use tracing::warn;

use crate::database::JobRepository;
use crate::domain::Job;

/// State shared by the job service and the coordinator.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<AdmissionQueue>,
    pub repository: Arc<dyn JobRepository>,
    pub layout: Arc<OutputLayout>,
    pub events: EventBus,
}

impl JobContext {
    pub fn new(repository: Arc<dyn JobRepository>, layout: OutputLayout) -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(AdmissionQueue::new()),
            repository,
            layout: Arc::new(layout),
            events: EventBus::new(),
        }
    }

    /// Write the record durably. Failures are logged, never raised.
    pub async fn persist(&self, job: &Job) {
        if let Err(e) = self.repository.save_job(job).await {
            warn!(job_id = %job.id, status = %job.status, error = %e, "Failed to persist job");
        }
    }
}
