//! Logging API routes.
//!
//! View and change the runtime log filter, and list the rolling log files.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::logging::{LOG_FILE_PREFIX, LoggingConfig, available_modules};

/// Request to update the log filter.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

/// Information about an available logging module.
#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogFileInfo {
    pub filename: String,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogFilesResponse {
    pub items: Vec<LogFileInfo>,
    pub total: u64,
}

/// Create the logging router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_logging_config).put(update_logging_config))
        .route("/files", get(list_log_files))
}

fn logging_config(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
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

/// Log files in `dir`, newest name first.
fn scan_log_files(dir: &Path) -> std::io::Result<Vec<LogFileInfo>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !filename.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            files.push(LogFileInfo {
                filename,
                size_bytes: metadata.len(),
            });
        }
    }

    files.sort_by(|a, b| b.filename.cmp(&a.filename));
    Ok(files)
}

#[utoipa::path(
    get,
    path = "/api/logging",
    tag = "logging",
    responses(
        (status = 200, description = "Logging configuration", body = LoggingConfigResponse),
        (status = 503, description = "Logging not configured", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
        available_modules: modules(),
    }))
}

#[utoipa::path(
    put,
    path = "/api/logging",
    tag = "logging",
    request_body = UpdateLogFilterRequest,
    responses(
        (status = 200, description = "Logging configuration updated", body = LoggingConfigResponse),
        (status = 422, description = "Invalid filter", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    config.set_filter(&request.filter)?;

    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
        available_modules: modules(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/logging/files",
    tag = "logging",
    responses((status = 200, description = "Log files", body = LogFilesResponse))
)]
pub async fn list_log_files(State(state): State<AppState>) -> ApiResult<Json<LogFilesResponse>> {
    let log_dir = logging_config(&state)?.log_dir().to_path_buf();

    let items = tokio::task::spawn_blocking(move || scan_log_files(&log_dir))
        .await
        .map_err(|e| ApiError::internal(format!("Failed to join list task: {e}")))?
        .map_err(|e| ApiError::internal(format!("Failed to read log directory: {e}")))?;

    Ok(Json(LogFilesResponse {
        total: items.len() as u64,
        items,
    }))
}
