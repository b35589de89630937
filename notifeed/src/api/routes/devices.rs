//! Device token routes (push opt-in and opt-out).

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::put,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{RegisterTokenRequest, UnregisterTokenResponse};
use crate::api::server::AppState;
use crate::database::models::DeviceTokenDbModel;

/// Routes nested under `/api/users`.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{user_id}/device-token",
        put(register_device_token)
            .get(get_device_token)
            .delete(unregister_device_token),
    )
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}/device-token",
    tag = "devices",
    params(("user_id" = String, Path, description = "User id")),
    request_body = RegisterTokenRequest,
    responses(
        (status = 200, description = "Token registered", body = DeviceTokenDbModel),
        (status = 422, description = "Empty token", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn register_device_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<RegisterTokenRequest>,
) -> ApiResult<Json<DeviceTokenDbModel>> {
    let row = state
        .services
        .device_tokens
        .register(&user_id, &request.token)
        .await?;
    Ok(Json(row))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/device-token",
    tag = "devices",
    params(("user_id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Registered token", body = DeviceTokenDbModel),
        (status = 404, description = "No token registered", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_device_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<DeviceTokenDbModel>> {
    state
        .services
        .device_tokens
        .get(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No device token for user '{}'", user_id)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{user_id}/device-token",
    tag = "devices",
    params(("user_id" = String, Path, description = "User id")),
    responses((status = 200, description = "Token removed", body = UnregisterTokenResponse))
)]
pub async fn unregister_device_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UnregisterTokenResponse>> {
    let removed = state.services.device_tokens.unregister(&user_id).await?;
    Ok(Json(UnregisterTokenResponse { removed }))
}
