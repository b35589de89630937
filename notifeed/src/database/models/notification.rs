//! Notification record models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::cmp::Ordering;

/// What happened to trigger a notification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    utoipa::ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    NewStatus,
    NewMessage,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        Self::Like,
        Self::Comment,
        Self::NewStatus,
        Self::NewMessage,
    ];

    /// Human-friendly label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Like => "Like",
            Self::Comment => "Comment",
            Self::NewStatus => "New Status",
            Self::NewMessage => "New Message",
        }
    }

    /// In-app route the notification deep-links to.
    pub fn link_for(&self, entity_id: &str) -> String {
        match self {
            Self::NewMessage => format!("/chat/{}", entity_id),
            Self::Like | Self::Comment | Self::NewStatus => "/status".to_string(),
        }
    }
}

impl TryFrom<String> for NotificationKind {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single entry in a user's notification log.
///
/// Identity is `(owner_user_id, id)`. Records are only ever created and have
/// their `is_read` flag flipped from false to true.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotificationRecord {
    pub owner_user_id: String,
    pub id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub from_user_avatar: Option<String>,
    /// Rendered text fragment shown after the sender's name.
    pub message: String,
    #[sqlx(try_from = "String")]
    pub kind: NotificationKind,
    /// Target resource for deep-linking.
    pub entity_id: String,
    /// Unix epoch milliseconds, assigned at write time.
    pub created_at: i64,
    pub is_read: bool,
}

impl NotificationRecord {
    pub fn link(&self) -> String {
        self.kind.link_for(&self.entity_id)
    }
}

/// Feed order: newest first, ties broken by id ascending.
pub fn feed_order(a: &NotificationRecord, b: &NotificationRecord) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Input for appending a record to a user's log.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NewNotification {
    pub owner_user_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub from_user_avatar: Option<String>,
    pub message: String,
    pub kind: NotificationKind,
    pub entity_id: String,
}
