//! Job notifications for live observers.
//!
//! Delivery is best-effort: slow subscribers may miss events, so consumers
//! treat progress as a watermark and re-query the job when in doubt.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::{Job, JobStatus};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        job_id: String,
        status: JobStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        message: String,
    },
    Completed {
        job_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        processing_time_secs: Option<i64>,
    },
    Failed {
        job_id: String,
        error: String,
    },
    Cancelled {
        job_id: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => job_id,
        }
    }

    pub fn progress(job: &Job, message: impl Into<String>) -> Self {
        Self::Progress {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            stage: job.stage.clone(),
            message: message.into(),
        }
    }

    /// Event describing a job's terminal state, or its current progress otherwise.
    pub fn snapshot(job: &Job) -> Self {
        match job.status {
            JobStatus::Completed => Self::Completed {
                job_id: job.id.clone(),
                processing_time_secs: job.processing_time_secs(),
            },
            JobStatus::Failed => Self::Failed {
                job_id: job.id.clone(),
                error: job.error.clone().unwrap_or_default(),
            },
            JobStatus::Cancelled => Self::Cancelled {
                job_id: job.id.clone(),
            },
            JobStatus::Queued => Self::progress(job, "Waiting in queue"),
            JobStatus::Processing => Self::progress(job, "Processing"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Broadcast fan-out of [`JobEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: JobEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Fingerprint, ProcessingParams, SourceDescriptor};

    #[test]
    fn test_event_json_shape() {
        let event = JobEvent::Failed {
            job_id: "j".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["job_id"], "j");
    }

    #[tokio::test]
    async fn test_snapshot_of_terminal_job() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let mut job = Job::new(
            "j",
            Fingerprint::of_bytes(b"a"),
            SourceDescriptor::Upload {
                filename: "a.mp3".into(),
                sha256: "a".into(),
                size_bytes: 1,
            },
            ProcessingParams::default(),
        );
        job.cancel().unwrap();
        bus.publish(JobEvent::snapshot(&job));

        let received = rx.recv().await.unwrap();
        assert!(received.is_terminal());
        assert_eq!(received.job_id(), "j");
    }
}
