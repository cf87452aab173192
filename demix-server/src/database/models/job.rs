//! Job row models.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::Job;
use crate::{Error, Result};

/// Job database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    /// Tagged fingerprint key (`sha256:<hex>` or `youtube:<id>`)
    pub fingerprint: String,
    pub external_id: Option<String>,
    /// queued, processing, completed, failed, cancelled
    pub status: String,
    /// Full job record as JSON
    pub record: String,
    /// ISO 8601 timestamp
    pub created_at: String,
    /// ISO 8601 timestamp
    pub updated_at: String,
}

impl JobDbModel {
    pub fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            fingerprint: job.fingerprint.key(),
            external_id: job.fingerprint.external_id().map(str::to_string),
            status: job.status.to_string(),
            record: serde_json::to_string(job)?,
            created_at: job.created_at.to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        })
    }

    /// Decode the stored record.
    ///
    /// Fails on partial writes and on records whose body disagrees with the row.
    pub fn to_job(&self) -> Result<Job> {
        decode_record(&self.id, &self.record)
    }
}

/// Job record duplicated under an external id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobExternalRefDbModel {
    pub external_id: String,
    pub job_id: String,
    pub record: String,
    pub updated_at: String,
}

impl JobExternalRefDbModel {
    pub fn to_job(&self) -> Result<Job> {
        decode_record(&self.job_id, &self.record)
    }
}

fn decode_record(expected_id: &str, record: &str) -> Result<Job> {
    let job: Job = serde_json::from_str(record)?;
    if job.id != expected_id {
        return Err(Error::Other(format!(
            "record id '{}' does not match row id '{}'",
            job.id, expected_id
        )));
    }
    Ok(job)
}
