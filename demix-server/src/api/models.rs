//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::{
    Job, JobStatus, PlaylistRef, SourceDescriptor, Stem, StemSelection, VideoMetadata,
};
use crate::jobs::{Admission, JobView};

const LIBRARY_DESCRIPTION_CHARS: usize = 200;

// ========== Requests ==========

#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeRequest {
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub stems: Option<String>,
}

/// Parameter overrides for a refresh. Unset fields keep the old values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub stems: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// Stem selection for result endpoints. Unset means the job's own selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StemsQuery {
    pub stems: Option<String>,
}

impl StemsQuery {
    pub fn selection(&self) -> Result<Option<StemSelection>> {
        self.stems
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(StemSelection::parse)
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

// ========== Service ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_jobs: usize,
    pub queued_jobs: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub description: String,
    pub stems: Vec<Stem>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub models: Vec<ModelInfo>,
    pub default_model: String,
    pub output_formats: Vec<String>,
    pub stem_options: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub max_source_duration_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ========== Jobs ==========

fn source_type(source: &SourceDescriptor) -> &'static str {
    match source {
        SourceDescriptor::Upload { .. } => "upload",
        SourceDescriptor::Youtube { .. } => "youtube",
    }
}

/// Full state of one job, as returned by the status endpoint.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub filename: String,
    pub source_type: &'static str,
    pub model: String,
    pub output_format: String,
    pub stems: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<i64>,
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_metadata: Option<VideoMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<PlaylistRef>,
}

impl From<JobView> for JobStatusResponse {
    fn from(view: JobView) -> Self {
        let JobView {
            job,
            queue_position,
            processing_time_secs,
        } = view;
        let filename = job.source.display_name().to_string();
        let (youtube_id, youtube_metadata, playlist) = match job.source {
            SourceDescriptor::Youtube {
                video_id,
                metadata,
                playlist,
                ..
            } => (Some(video_id), metadata, playlist),
            SourceDescriptor::Upload { .. } => (None, None, None),
        };

        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            stage: job.stage,
            filename,
            source_type: if youtube_id.is_some() { "youtube" } else { "upload" },
            model: job.params.model.to_string(),
            output_format: job.params.output_format.to_string(),
            stems: job.params.stems.to_string(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            processing_time_seconds: processing_time_secs,
            duration: job.duration_secs,
            queue_position,
            error_message: job.error,
            youtube_id,
            youtube_metadata,
            playlist,
        }
    }
}

/// Compact row for job listings.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub filename: String,
    pub source_type: &'static str,
    pub model: String,
    pub output_format: String,
    pub stems: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        let metadata = job.source.metadata();
        Self {
            job_id: job.id.clone(),
            status: job.status,
            filename: job.source.display_name().to_string(),
            source_type: source_type(&job.source),
            model: job.params.model.to_string(),
            output_format: job.params.output_format.to_string(),
            stems: job.params.stems.to_string(),
            progress: job.progress,
            created_at: job.created_at,
            duration: job.duration_secs,
            thumbnail: metadata.and_then(|m| m.thumbnail.clone()),
            uploader: metadata.and_then(|m| m.uploader.clone()),
            channel: metadata.and_then(|m| m.channel.clone()),
            description: metadata
                .and_then(|m| m.description.as_deref())
                .map(|d| d.chars().take(LIBRARY_DESCRIPTION_CHARS).collect()),
            error_message: job.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Serialize)]
pub struct LibraryResponse {
    pub jobs: Vec<JobSummary>,
    pub page: usize,
    pub page_size: usize,
    pub total_jobs: usize,
    pub total_pages: usize,
}

/// Answer to an upload, single video or refresh submission.
#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub filename: String,
    pub model: String,
    pub output_format: String,
    /// The requester's selection, which may differ from a cached job's own.
    pub stems: String,
    pub duration: Option<u64>,
    pub cached: bool,
    /// Download link that packages `stems`.
    pub download_url: String,
    pub message: String,
}

fn download_url(job_id: &str, stems: StemSelection) -> String {
    format!("/api/download/{}?stems={}", job_id, stems)
}

impl AdmissionResponse {
    pub fn from_admission(admission: &Admission, message: impl Into<String>) -> Self {
        let job = &admission.job;
        Self {
            kind: None,
            job_id: job.id.clone(),
            status: job.status,
            created_at: job.created_at,
            filename: job.source.display_name().to_string(),
            model: job.params.model.to_string(),
            output_format: job.params.output_format.to_string(),
            stems: admission.stems.to_string(),
            duration: job.duration_secs,
            cached: admission.cached,
            download_url: download_url(&job.id, admission.stems),
            message: message.into(),
        }
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct PlaylistJobEntry {
    pub job_id: String,
    pub title: String,
    pub position: usize,
    pub status: JobStatus,
    pub cached: bool,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct PlaylistAdmissionResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub playlist_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub total_videos: usize,
    pub jobs_created: usize,
    pub jobs_cached: usize,
    pub jobs: Vec<PlaylistJobEntry>,
    pub message: String,
}

impl PlaylistAdmissionResponse {
    pub fn new(
        playlist_id: String,
        title: Option<String>,
        total_videos: usize,
        admissions: &[Admission],
    ) -> Self {
        let jobs: Vec<PlaylistJobEntry> = admissions
            .iter()
            .enumerate()
            .map(|(idx, a)| PlaylistJobEntry {
                job_id: a.job.id.clone(),
                title: a.job.source.display_name().to_string(),
                position: idx + 1,
                status: a.job.status,
                cached: a.cached,
                download_url: download_url(&a.job.id, a.stems),
            })
            .collect();
        let jobs_cached = jobs.iter().filter(|j| j.cached).count();
        let jobs_created = jobs.len() - jobs_cached;

        Self {
            kind: "playlist",
            message: format!(
                "Added {} videos ({} new, {} cached)",
                jobs.len(),
                jobs_created,
                jobs_cached
            ),
            playlist_id,
            title,
            total_videos,
            jobs_created,
            jobs_cached,
            jobs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StemInfo {
    pub name: Stem,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct StemsResponse {
    pub job_id: String,
    pub output_format: String,
    pub stems: Vec<StemInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Fingerprint, ProcessingParams};

    fn youtube_job() -> Job {
        Job::new(
            "yt-abc",
            Fingerprint::youtube("abcdefghijk"),
            SourceDescriptor::Youtube {
                video_id: "abcdefghijk".into(),
                url: "https://youtu.be/abcdefghijk".into(),
                metadata: Some(VideoMetadata {
                    id: "abcdefghijk".into(),
                    title: "Song".into(),
                    duration_secs: 200,
                    description: Some("d".repeat(500)),
                    ..Default::default()
                }),
                playlist: None,
            },
            ProcessingParams::default(),
        )
    }

    #[test]
    fn test_status_response_shape() {
        let view = JobView {
            job: youtube_job(),
            queue_position: Some(2),
            processing_time_secs: None,
        };
        let json = serde_json::to_value(JobStatusResponse::from(view)).unwrap();
        assert_eq!(json["job_id"], "yt-abc");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["source_type"], "youtube");
        assert_eq!(json["model"], "htdemucs_ft");
        assert_eq!(json["stems"], "all");
        assert_eq!(json["queue_position"], 2);
        assert_eq!(json["youtube_id"], "abcdefghijk");
        assert!(json.get("completed_at").is_none());
    }

    #[test]
    fn test_summary_truncates_description() {
        let summary = JobSummary::from(&youtube_job());
        assert_eq!(summary.filename, "Song");
        assert_eq!(summary.description.unwrap().chars().count(), 200);
    }

    #[test]
    fn test_playlist_response_counts() {
        let job = youtube_job();
        let admissions = vec![
            Admission {
                job: job.clone(),
                cached: true,
                stems: StemSelection::Only(Stem::Drums),
            },
            Admission {
                job,
                cached: false,
                stems: StemSelection::All,
            },
        ];
        let response = PlaylistAdmissionResponse::new("PL1".into(), None, 2, &admissions);
        assert_eq!(response.jobs_cached, 1);
        assert_eq!(response.jobs_created, 1);
        assert_eq!(response.jobs[1].position, 2);
        assert_eq!(response.jobs[0].download_url, "/api/download/yt-abc?stems=drums");
        assert_eq!(response.message, "Added 2 videos (1 new, 1 cached)");
    }
}
