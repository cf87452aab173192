//! FIFO admission queue.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use super::store::JobStore;
use crate::domain::JobStatus;

/// Ordered list of job ids awaiting execution.
///
/// Entries whose job is no longer `queued` stay in place until released and
/// are skipped by [`AdmissionQueue::peek_next_queued`].
#[derive(Default)]
pub struct AdmissionQueue {
    entries: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake the coordinator.
    pub fn enqueue(&self, job_id: impl Into<String>) {
        self.entries.lock().push_back(job_id.into());
        self.notify.notify_one();
    }

    /// First entry, in admission order, whose job is still `queued`.
    pub fn peek_next_queued(&self, store: &dyn JobStore) -> Option<String> {
        // Snapshot first so the queue lock is never held while the store lock is taken.
        let snapshot: Vec<String> = self.entries.lock().iter().cloned().collect();
        snapshot.into_iter().find(|id| {
            store
                .get(id)
                .is_some_and(|job| job.status == JobStatus::Queued)
        })
    }

    pub fn remove(&self, job_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id| id != job_id);
        entries.len() != before
    }

    /// 1-based position among entries, if present.
    pub fn position(&self, job_id: &str) -> Option<usize> {
        self.entries
            .lock()
            .iter()
            .position(|id| id == job_id)
            .map(|p| p + 1)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Resolves on the next admission, or immediately if one happened since the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Fingerprint, Job, ProcessingParams, SourceDescriptor};
    use crate::jobs::store::MemoryJobStore;

    fn admit(store: &MemoryJobStore, queue: &AdmissionQueue, id: &str) {
        store.put(Job::new(
            id,
            Fingerprint::of_bytes(id.as_bytes()),
            SourceDescriptor::Upload {
                filename: "a.wav".into(),
                sha256: id.into(),
                size_bytes: 1,
            },
            ProcessingParams::default(),
        ));
        queue.enqueue(id);
    }

    #[test]
    fn test_fifo_order() {
        let store = MemoryJobStore::new();
        let queue = AdmissionQueue::new();
        for id in ["a", "b", "c"] {
            admit(&store, &queue, id);
        }

        let mut order = Vec::new();
        while let Some(next) = queue.peek_next_queued(&store) {
            queue.remove(&next);
            order.push(next);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancelled_entries_are_skipped() {
        let store = MemoryJobStore::new();
        let queue = AdmissionQueue::new();
        admit(&store, &queue, "a");
        admit(&store, &queue, "b");
        store.modify("a", &mut |j| j.cancel()).unwrap();

        assert_eq!(queue.peek_next_queued(&store).as_deref(), Some("b"));
        assert_eq!(queue.position("b"), Some(2));
    }

    #[test]
    fn test_missing_jobs_are_skipped() {
        let store = MemoryJobStore::new();
        let queue = AdmissionQueue::new();
        queue.enqueue("ghost");
        assert!(queue.peek_next_queued(&store).is_none());
        assert!(queue.remove("ghost"));
        assert!(!queue.remove("ghost"));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_waiter() {
        let queue = std::sync::Arc::new(AdmissionQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue("a");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
