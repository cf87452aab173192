//! Health and service information routes.

use axum::{Json, Router, extract::State, routing::get};
use strum::IntoEnumIterator;

use crate::api::models::{HealthResponse, InfoResponse, ModelInfo};
use crate::api::server::AppState;
use crate::domain::{OutputFormat, SeparationModel, Stem};
use crate::intake::ALLOWED_EXTENSIONS;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/info", get(service_info))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.jobs.counts();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_jobs: counts.active,
        queued_jobs: counts.queued,
    })
}

async fn service_info(State(state): State<AppState>) -> Json<InfoResponse> {
    let models = SeparationModel::iter()
        .map(|model| ModelInfo {
            name: model.to_string(),
            description: model.description().to_string(),
            stems: model.stems().to_vec(),
        })
        .collect();

    let stem_options = std::iter::once("all".to_string())
        .chain(Stem::iter().map(|s| s.to_string()))
        .collect();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        models,
        default_model: SeparationModel::default().to_string(),
        output_formats: OutputFormat::iter().map(|f| f.to_string()).collect(),
        stem_options,
        allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        max_upload_bytes: state.limits.max_upload_bytes,
        max_source_duration_secs: state.limits.max_source_duration_secs,
    })
}
