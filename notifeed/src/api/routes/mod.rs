//! API route modules.
//!
//! Organizes routes by resource type.

pub mod devices;
pub mod feed;
pub mod health;
pub mod logging;
pub mod notifications;

use axum::{Json, Router, routing::get};
use utoipa::OpenApi;

use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let users = Router::new()
        .merge(devices::router())
        .merge(feed::router())
        .merge(notifications::user_router());

    Router::new()
        .nest("/api/users", users)
        .nest("/api/notifications", notifications::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .route("/api/openapi.json", get(openapi_json))
        .with_state(state)
}
