//! Notification feed routes.
//!
//! `GET /feed` returns a one-shot window; `GET /feed/ws` keeps it live over a
//! WebSocket and reconciles read state when the client reports the feed open.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{FeedClientMessage, FeedQuery, FeedServerMessage, FeedSocketQuery};
use crate::api::server::AppState;
use crate::error::Error;
use crate::notification::{FeedChange, FeedSnapshot, FeedSubscription, FeedWindow, ReconcileOutcome};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Routes nested under `/api/users`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{user_id}/feed", get(get_feed))
        .route("/{user_id}/feed/ws", get(feed_ws))
        .route("/{user_id}/feed/opened", post(mark_feed_opened))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/feed",
    tag = "feed",
    params(("user_id" = String, Path, description = "Feed owner"), FeedQuery),
    responses((status = 200, description = "Newest notifications", body = FeedSnapshot))
)]
pub async fn get_feed(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<FeedSnapshot>> {
    let limit = state.services.feeds.config().clamp_limit(query.limit);
    let records = state
        .services
        .notifications
        .list_recent(&user_id, limit)
        .await?;
    let window = FeedWindow::new(limit as usize, records);
    Ok(Json(window.snapshot(FeedChange::Initial)))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/feed/opened",
    tag = "feed",
    params(("user_id" = String, Path, description = "Feed owner")),
    responses(
        (status = 200, description = "Unread records marked read", body = ReconcileOutcome),
        (status = 409, description = "Concurrent change; retry", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn mark_feed_opened(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ReconcileOutcome>> {
    let outcome = state.services.reconciler.mark_feed_opened(&user_id).await?;
    Ok(Json(outcome))
}

/// WebSocket handler for a live feed.
#[utoipa::path(
    get,
    path = "/api/users/{user_id}/feed/ws",
    tag = "feed",
    params(("user_id" = String, Path, description = "Feed owner"), FeedSocketQuery),
    responses((status = 101, description = "Switching to WebSocket"))
)]
pub async fn feed_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<FeedSocketQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if state.services.is_shutting_down() {
        return Err(ApiError::service_unavailable("Server is shutting down"));
    }

    let session_id = query
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let subscription = state
        .services
        .feeds
        .subscribe(&session_id, &user_id, query.limit)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

fn encode(message: &FeedServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode feed message");
            None
        }
    }
}

fn error_message(err: Error) -> FeedServerMessage {
    let api = ApiError::from(err);
    FeedServerMessage::Error {
        code: api.code,
        message: api.message,
    }
}

/// Handle an established feed WebSocket.
async fn handle_socket(socket: WebSocket, mut subscription: FeedSubscription) {
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let outgoing = tokio::select! {
            next = subscription.next() => match next {
                Ok(Some(snapshot)) => FeedServerMessage::Snapshot(snapshot),
                Ok(None) => FeedServerMessage::Terminated {
                    reason: "subscription replaced or closed".to_string(),
                },
                Err(e) => FeedServerMessage::Terminated { reason: e.to_string() },
            },

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
                continue;
            }

            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<FeedClientMessage>(text.as_str()) {
                        Ok(FeedClientMessage::Open) => match subscription.set_open(true).await {
                            Ok(Some(outcome)) => FeedServerMessage::Reconciled(outcome),
                            Ok(None) => continue,
                            Err(e) => error_message(e),
                        },
                        Ok(FeedClientMessage::Close) => {
                            // Closing never touches the store.
                            let _ = subscription.set_open(false).await;
                            continue;
                        }
                        Err(e) => FeedServerMessage::Error {
                            code: "BAD_REQUEST".to_string(),
                            message: format!("Unrecognized message: {e}"),
                        },
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            },
        };

        let terminal = matches!(outgoing, FeedServerMessage::Terminated { .. });
        if let Some(frame) = encode(&outgoing) {
            if sender.send(frame).await.is_err() {
                break;
            }
        }
        if terminal {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }
    }

    tracing::debug!(
        session_id = %subscription.session_id(),
        user_id = %subscription.user_id(),
        "Feed socket closed"
    );
}
