//! Notification events and push payloads.

use serde::{Deserialize, Serialize};

use crate::database::models::{NewNotification, NotificationKind};

/// Gateway display limits, in characters.
pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_BODY_CHARS: usize = 600;

/// The `{title, body}` payload handed to the push gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// In-app route opened when the push is tapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl PushMessage {
    /// Build a payload, truncating both fields to the gateway display limits.
    pub fn new(title: impl AsRef<str>, body: impl AsRef<str>) -> Self {
        Self {
            title: truncate_string(title.as_ref(), MAX_TITLE_CHARS),
            body: truncate_string(body.as_ref(), MAX_BODY_CHARS),
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// The user who caused a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SenderProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Something happened that `recipient` should hear about.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotificationEvent {
    pub recipient: String,
    pub from_user: SenderProfile,
    pub kind: NotificationKind,
    pub entity_id: String,
    /// Text fragment shown after the sender's name, e.g. "liked your status".
    pub message: String,
}

impl NotificationEvent {
    /// Record to append to the recipient's log.
    pub fn to_new_notification(&self) -> NewNotification {
        NewNotification {
            owner_user_id: self.recipient.clone(),
            from_user_id: self.from_user.id.clone(),
            from_user_name: self.from_user.display_name.clone(),
            from_user_avatar: self.from_user.avatar_url.clone(),
            message: self.message.clone(),
            kind: self.kind,
            entity_id: self.entity_id.clone(),
        }
    }

    /// Push payload: the sender's name as title, the fragment as body.
    pub fn push_message(&self) -> PushMessage {
        PushMessage::new(&self.from_user.display_name, &self.message)
            .with_link(self.kind.link_for(&self.entity_id))
    }
}

fn truncate_string(input: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut iter = input.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        match iter.next() {
            Some(c) => out.push(c),
            None => return out,
        }
    }
    if iter.next().is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("short", 10, "short")]
    #[case("exactly10!", 10, "exactly10!")]
    #[case("eleven chars", 6, "eleven…")]
    #[case("héllo wörld", 5, "héllo…")]
    #[case("anything", 0, "")]
    fn test_truncate_string(#[case] input: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(truncate_string(input, max), expected);
    }

    #[test]
    fn test_event_renders_record_and_payload() {
        let event = NotificationEvent {
            recipient: "alice".to_string(),
            from_user: SenderProfile {
                id: "bob".to_string(),
                display_name: "Bob".to_string(),
                avatar_url: Some("https://cdn/bob.png".to_string()),
            },
            kind: NotificationKind::NewMessage,
            entity_id: "chat-7".to_string(),
            message: "sent you a message".to_string(),
        };

        let record = event.to_new_notification();
        assert_eq!(record.owner_user_id, "alice");
        assert_eq!(record.from_user_avatar.as_deref(), Some("https://cdn/bob.png"));

        let push = event.push_message();
        assert_eq!(push.title, "Bob");
        assert_eq!(push.body, "sent you a message");
        assert_eq!(push.link.as_deref(), Some("/chat/chat-7"));
    }

    #[test]
    fn test_push_message_is_truncated() {
        let push = PushMessage::new("t".repeat(200), "b".repeat(601));
        assert_eq!(push.title.chars().count(), MAX_TITLE_CHARS + 1);
        assert_eq!(push.body.chars().count(), MAX_BODY_CHARS + 1);
    }
}
