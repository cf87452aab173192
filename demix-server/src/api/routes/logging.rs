//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::available_modules;

pub fn router() -> Router<AppState> {
    Router::new().route("/filter", get(get_logging_config).put(update_logging_config))
}

fn modules() -> Vec<ModuleInfo> {
    available_modules()
        .into_iter()
        .map(|(name, desc)| ModuleInfo {
            name: name.to_string(),
            description: desc.to_string(),
        })
        .collect()
}

async fn get_logging_config(State(state): State<AppState>) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;

    Ok(Json(LoggingConfigResponse {
        filter: logging_config.get_filter(),
        available_modules: modules(),
    }))
}

async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;

    logging_config.set_filter(&request.filter)?;

    Ok(Json(LoggingConfigResponse {
        filter: request.filter,
        available_modules: modules(),
    }))
}
