//! In-memory job map.
//!
//! Every read and every read-modify-write goes through one mutex, so a status
//! check and the mutation that depends on it can never interleave with another
//! writer.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::{Job, JobStatus};
use crate::{Error, Result};

/// Storage for live job records.
pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Job>;
    fn put(&self, job: Job);
    /// Insert only if no job with this id exists. Returns `false` on conflict.
    fn insert_new(&self, job: Job) -> bool;
    fn list(&self) -> Vec<Job>;
    fn delete(&self, id: &str) -> Option<Job>;
    fn contains(&self, id: &str) -> bool;
    /// Apply `f` atomically and return the updated record.
    ///
    /// When `f` fails the record is left untouched.
    fn modify(&self, id: &str, f: &mut dyn FnMut(&mut Job) -> Result<()>) -> Result<Job>;
    fn count_by_status(&self, status: JobStatus) -> usize;
}

/// `JobStore` backed by a `HashMap` behind a single mutex.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    fn put(&self, job: Job) {
        self.jobs.lock().insert(job.id.clone(), job);
    }

    fn insert_new(&self, job: Job) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return false;
        }
        jobs.insert(job.id.clone(), job);
        true
    }

    fn list(&self) -> Vec<Job> {
        self.jobs.lock().values().cloned().collect()
    }

    fn delete(&self, id: &str) -> Option<Job> {
        self.jobs.lock().remove(id)
    }

    fn contains(&self, id: &str) -> bool {
        self.jobs.lock().contains_key(id)
    }

    fn modify(&self, id: &str, f: &mut dyn FnMut(&mut Job) -> Result<()>) -> Result<Job> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id).ok_or_else(|| Error::not_found("Job", id))?;
        let mut draft = job.clone();
        f(&mut draft)?;
        *job = draft.clone();
        Ok(draft)
    }

    fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|job| job.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Fingerprint, ProcessingParams, SourceDescriptor};
    use std::sync::Arc;

    fn job(id: &str) -> Job {
        Job::new(
            id,
            Fingerprint::of_bytes(id.as_bytes()),
            SourceDescriptor::Upload {
                filename: "a.mp3".into(),
                sha256: id.into(),
                size_bytes: 1,
            },
            ProcessingParams::default(),
        )
    }

    #[test]
    fn test_insert_new_refuses_duplicates() {
        let store = MemoryJobStore::new();
        assert!(store.insert_new(job("a")));
        assert!(!store.insert_new(job("a")));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_failed_modify_leaves_record_untouched() {
        let store = MemoryJobStore::new();
        store.put(job("a"));
        store
            .modify("a", &mut |j| {
                j.progress = 42;
                j.cancel()?;
                j.start()
            })
            .unwrap_err();
        let stored = store.get("a").unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.progress, 0);
    }

    #[test]
    fn test_modify_unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.modify("nope", &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_concurrent_transitions_have_one_winner() {
        let store = Arc::new(MemoryJobStore::new());
        store.put(job("a"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .modify("a", &mut |j| if i % 2 == 0 { j.start() } else { j.cancel() })
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        let status = store.get("a").unwrap().status;
        // Either a cancel won outright, or a start won and then one cancel followed.
        match status {
            JobStatus::Cancelled => assert!(winners == 1 || winners == 2),
            other => panic!("unexpected status {other}"),
        }
    }
}
