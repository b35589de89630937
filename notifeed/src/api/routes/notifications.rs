//! Push and notification routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};

use crate::api::error::ApiResult;
use crate::api::models::{CreateNotificationRequest, PushRequest};
use crate::api::server::AppState;
use crate::notification::{
    DispatchReport, NotificationEvent, NotifyResult, PushMessage, SendOutcome,
};

/// Routes nested under `/api/notifications`.
pub fn router() -> Router<AppState> {
    Router::new().route("/broadcast", post(broadcast))
}

/// Routes nested under `/api/users`.
pub fn user_router() -> Router<AppState> {
    Router::new()
        .route("/{user_id}/push", post(push_to_user))
        .route("/{user_id}/notifications", post(create_notification))
}

#[utoipa::path(
    post,
    path = "/api/notifications/broadcast",
    tag = "notifications",
    request_body = PushRequest,
    responses((status = 200, description = "Aggregated delivery counts", body = DispatchReport))
)]
pub async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> ApiResult<Json<DispatchReport>> {
    let message = PushMessage::new(&request.title, &request.body);
    let report = state.services.dispatcher.broadcast(&message).await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/push",
    tag = "notifications",
    params(("user_id" = String, Path, description = "Recipient user id")),
    request_body = PushRequest,
    responses((status = 200, description = "Delivery outcome", body = SendOutcome))
)]
pub async fn push_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PushRequest>,
) -> ApiResult<Json<SendOutcome>> {
    let message = PushMessage::new(&request.title, &request.body);
    let outcome = state
        .services
        .dispatcher
        .send_to_user(&user_id, &message)
        .await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/notifications",
    tag = "notifications",
    params(("user_id" = String, Path, description = "Recipient user id")),
    request_body = CreateNotificationRequest,
    responses(
        (status = 201, description = "Record stored; push attempted", body = NotifyResult),
        (status = 422, description = "Invalid event", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn create_notification(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<CreateNotificationRequest>,
) -> ApiResult<(StatusCode, Json<NotifyResult>)> {
    let event = NotificationEvent {
        recipient: user_id,
        from_user: request.from_user,
        kind: request.kind,
        entity_id: request.entity_id,
        message: request.message,
    };
    let result = state.services.dispatcher.notify(&event).await?;
    Ok((StatusCode::CREATED, Json(result)))
}
