//! Job submission, query and result routes.

use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use std::path::Path as FsPath;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    AdmissionResponse, CancelResponse, JobListResponse, JobStatusResponse, JobSummary,
    LibraryQuery, LibraryResponse, ListJobsQuery, MessageResponse, PlaylistAdmissionResponse,
    RefreshRequest, StemInfo, StemsQuery, StemsResponse, YoutubeRequest,
};
use crate::api::server::AppState;
use crate::domain::ProcessingParams;
use crate::jobs::{CancelOutcome, YoutubeAdmission};

const DEFAULT_LIST_LIMIT: usize = 10;
const DEFAULT_PAGE_SIZE: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/youtube", post(submit_youtube))
        .route("/api/status/{id}", get(job_status))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", delete(delete_job))
        .route("/api/library", get(library))
        .route("/api/cancel/{id}", post(cancel_job))
        .route("/api/refresh/{id}", post(refresh_job))
        .route("/api/download/{id}", get(download))
        .route("/api/streams/{id}", get(list_stems))
        .route("/api/stream/{id}/{stem}", get(stream_stem))
}

fn admission_status(cached: bool) -> StatusCode {
    if cached {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}

/// Multipart upload: `audio_file` plus optional `model`, `output_format`, `stems`.
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Response> {
    let mut file: Option<(String, bytes::Bytes)> = None;
    let mut model = None;
    let mut output_format = None;
    let mut stems = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
                file = Some((filename, data));
            }
            "model" | "output_format" | "stems" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid field {}: {}", name, e)))?;
                match name.as_str() {
                    "model" => model = Some(value),
                    "output_format" => output_format = Some(value),
                    _ => stems = Some(value),
                }
            }
            _ => {}
        }
    }

    let Some((filename, data)) = file else {
        return Err(ApiError::bad_request("No audio file provided"));
    };
    if filename.trim().is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }

    let params = ProcessingParams::from_request(
        model.as_deref(),
        output_format.as_deref(),
        stems.as_deref(),
    )?;
    let admission = state.jobs.submit_upload(&filename, &data, params).await?;

    let message = if admission.cached {
        "File already processed, returning cached job"
    } else {
        "File uploaded successfully"
    };
    let body = AdmissionResponse::from_admission(&admission, message);
    Ok((admission_status(admission.cached), Json(body)).into_response())
}

async fn submit_youtube(
    State(state): State<AppState>,
    Json(request): Json<YoutubeRequest>,
) -> ApiResult<Response> {
    if request.url.trim().is_empty() {
        return Err(ApiError::bad_request("YouTube URL is required"));
    }
    let params = ProcessingParams::from_request(
        request.model.as_deref(),
        request.output_format.as_deref(),
        request.stems.as_deref(),
    )?;

    match state.jobs.submit_youtube(&request.url, params).await? {
        YoutubeAdmission::Video(admission) => {
            let message = if admission.cached {
                "Video already exists, skipping processing"
            } else {
                "Video added to queue"
            };
            let body = AdmissionResponse::from_admission(&admission, message).with_kind("video");
            Ok((admission_status(admission.cached), Json(body)).into_response())
        }
        YoutubeAdmission::Playlist {
            playlist_id,
            title,
            total_videos,
            admissions,
        } => {
            let body =
                PlaylistAdmissionResponse::new(playlist_id, title, total_videos, &admissions);
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
    }
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let view = state.jobs.view(&id)?;
    Ok(Json(view.into()))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Json<JobListResponse> {
    let jobs = state
        .jobs
        .list_recent(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .iter()
        .map(JobSummary::from)
        .collect();
    Json(JobListResponse { jobs })
}

async fn library(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> Json<LibraryResponse> {
    let page = state.jobs.library(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    Json(LibraryResponse {
        jobs: page.jobs.iter().map(JobSummary::from).collect(),
        page: page.page,
        page_size: page.page_size,
        total_jobs: page.total_jobs,
        total_pages: page.total_pages,
    })
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.jobs.delete(&id).await?;
    Ok(Json(MessageResponse::new("Job deleted successfully")))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let outcome = state.jobs.cancel(&id).await?;
    let job = state.jobs.get(&id)?;
    let message = match outcome {
        CancelOutcome::Cancelled => "Job cancelled",
        CancelOutcome::Requested => "Cancellation requested",
    };
    Ok(Json(CancelResponse {
        job_id: job.id,
        status: job.status,
        message: message.to_string(),
    }))
}

async fn refresh_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<RefreshRequest>>,
) -> ApiResult<Response> {
    let Json(request) = request.unwrap_or_default();
    let admission = state
        .jobs
        .refresh(
            &id,
            request.model.as_deref(),
            request.output_format.as_deref(),
            request.stems.as_deref(),
        )
        .await?;
    let body = AdmissionResponse::from_admission(&admission, "Job refreshed and added to queue");
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// ZIP of the job's stems; `?stems=` packages another selection.
async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StemsQuery>,
) -> ApiResult<Response> {
    let archive = state.jobs.prepare_archive(&id, query.selection()?).await?;
    info!(job_id = %id, file = %archive.file_name, "Serving archive");

    let fallback = format!("stems_{}.zip", id);
    file_response(
        &archive.path,
        "application/zip",
        &format!("attachment; filename=\"{}\"", archive.file_name),
        &format!("attachment; filename=\"{}\"", fallback),
    )
    .await
}

/// Streamable stems on disk. Without `?stems=` every stem is listed.
async fn list_stems(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StemsQuery>,
) -> ApiResult<Json<StemsResponse>> {
    let job = state.jobs.get(&id)?;
    let selection = query.selection()?.unwrap_or_default();
    let stems = state.jobs.available_stems(&id).await?;
    let ext = job.params.output_format.extension();
    Ok(Json(StemsResponse {
        stems: stems
            .into_iter()
            .filter(|stem| selection.includes(*stem))
            .map(|stem| StemInfo {
                name: stem,
                url: format!("/api/stream/{}/{}.{}", id, stem, ext),
            })
            .collect(),
        output_format: job.params.output_format.to_string(),
        job_id: id,
    }))
}

async fn stream_stem(
    State(state): State<AppState>,
    Path((id, stem)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (path, format) = state.jobs.stem_file(&id, &stem).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("stem")
        .to_string();
    let disposition = format!("inline; filename=\"{}\"", name);
    file_response(&path, format.mime_type(), &disposition, "inline").await
}

/// Stream a file from disk with the given content type and disposition.
async fn file_response(
    path: &FsPath,
    content_type: &'static str,
    disposition: &str,
    fallback_disposition: &str,
) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ApiError::not_found("Output files not found"))?;
    let len = file.metadata().await.ok().map(|m| m.len());

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    let disposition = HeaderValue::from_str(disposition)
        .or_else(|_| HeaderValue::from_str(fallback_disposition))
        .map_err(|_| ApiError::internal("Invalid file name"))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Some(len) = len {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}
