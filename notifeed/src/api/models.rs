//! API request and response types.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::database::models::NotificationKind;
use crate::notification::{FeedSnapshot, ReconcileOutcome, SenderProfile};
use crate::services::container::ServiceStats;

/// Overall service health.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ServiceStats>,
}

/// Health of one dependency.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LivenessResponse {
    /// Status indicator (always "alive" if responding)
    pub status: String,
    pub uptime_secs: u64,
}

/// Register a device token for push delivery.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterTokenRequest {
    pub token: String,
}

/// Result of an explicit opt-out.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnregisterTokenResponse {
    /// Whether a token was stored before the call.
    pub removed: bool,
}

/// Title and body of a push.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PushRequest {
    pub title: String,
    pub body: String,
}

/// Event to record in the path user's feed and push to their device.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    pub from_user: SenderProfile,
    pub kind: NotificationKind,
    pub entity_id: String,
    pub message: String,
}

/// Feed window query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct FeedQuery {
    /// Window size; defaults to the configured feed limit.
    pub limit: Option<u32>,
}

/// Feed WebSocket query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct FeedSocketQuery {
    pub limit: Option<u32>,
    /// Session owning the subscription; a new one replaces the session's previous feed.
    pub session_id: Option<String>,
}

/// Messages a feed WebSocket client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedClientMessage {
    /// The feed surface became visible.
    Open,
    /// The feed surface was hidden.
    Close,
}

/// Messages sent to a feed WebSocket client.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedServerMessage {
    Snapshot(FeedSnapshot),
    Reconciled(ReconcileOutcome),
    Error { code: String, message: String },
    Terminated { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::FeedChange;

    #[test]
    fn test_client_message_parsing() {
        let open: FeedClientMessage = serde_json::from_str(r#"{"type":"open"}"#).unwrap();
        assert_eq!(open, FeedClientMessage::Open);
        let close: FeedClientMessage = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert_eq!(close, FeedClientMessage::Close);
        assert!(serde_json::from_str::<FeedClientMessage>(r#"{"type":"poke"}"#).is_err());
    }

    #[test]
    fn test_server_message_tagging() {
        let msg = FeedServerMessage::Snapshot(FeedSnapshot {
            records: vec![],
            unread_count: 0,
            change: FeedChange::Initial,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["unread_count"], 0);
        assert_eq!(json["change"]["type"], "initial");

        let json = serde_json::to_value(FeedServerMessage::Reconciled(ReconcileOutcome {
            marked_read: 3,
        }))
        .unwrap();
        assert_eq!(json["type"], "reconciled");
        assert_eq!(json["marked_read"], 3);
    }
}
