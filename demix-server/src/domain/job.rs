//! The job entity and its lifecycle.
//!
//! ```text
//! queued ──► processing ──► completed
//!   │            ├────────► failed
//!   │            └────────► cancelled
//!   ├──► failed            (source could not be resolved)
//!   └──► cancelled
//! ```
//!
//! Terminal states are final; only deletion removes such a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Fingerprint, ProcessingParams, SourceDescriptor};
use crate::{Error, Result};

/// Job status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Admitted and waiting for the coordinator.
    Queued,
    /// The separation tool is running for this job.
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a record in this status survives a restart.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

/// A unit of separation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub fingerprint: Fingerprint,
    pub status: JobStatus,
    /// 0-100, never decreases while processing.
    pub progress: u8,
    #[serde(default)]
    pub stage: Option<String>,
    pub source: SourceDescriptor,
    pub params: ProcessingParams,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        fingerprint: Fingerprint,
        source: SourceDescriptor,
        params: ProcessingParams,
    ) -> Self {
        Self {
            id: id.into(),
            fingerprint,
            status: JobStatus::Queued,
            progress: 0,
            stage: None,
            source,
            params,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            duration_secs: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid_transition(self.status, next));
        }
        self.status = next;
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// `queued -> processing`; resets progress for the run.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)?;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.progress = 0;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.stage = Some("completed".to_string());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelled)
    }

    /// Raise progress to `percent`. Returns `true` only when the value moved.
    pub fn advance_progress(&mut self, percent: u8) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }

    /// Record a stage change. Returns `true` when the stage differs from the last one.
    pub fn set_stage(&mut self, stage: &str) -> bool {
        if self.stage.as_deref() == Some(stage) {
            return false;
        }
        self.stage = Some(stage.to_string());
        true
    }

    pub fn processing_time_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_seconds().max(0))
    }
}
