//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use notifeed::Result;
use notifeed::database::Database;
use notifeed::database::models::NotificationKind;
use notifeed::notification::{
    DeliveryOutcome, DispatchConfig, FeedConfig, NotificationEvent, PushGateway, PushMessage,
    SenderProfile,
};
use notifeed::services::ServiceContainer;

/// How the scripted gateway answers a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScript {
    Deliver,
    Reject,
    Unavailable,
}

/// Push gateway double driven by token prefixes.
///
/// - `dead-*` tokens are rejected permanently
/// - `busy-*` tokens fail transiently
/// - a batch containing any `boom-*` token fails as a whole
/// - everything else is delivered
#[derive(Default)]
pub struct ScriptedGateway {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn script_for(token: &str) -> TokenScript {
        if token.starts_with("dead-") {
            TokenScript::Reject
        } else if token.starts_with("busy-") {
            TokenScript::Unavailable
        } else {
            TokenScript::Deliver
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.calls.lock().iter().map(Vec::len).collect();
        sizes.sort_unstable();
        sizes
    }
}

#[async_trait]
impl PushGateway for ScriptedGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        _message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>> {
        self.calls.lock().push(tokens.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if tokens.iter().any(|t| t.starts_with("boom-")) {
            return Err(notifeed::Error::Gateway("HTTP 500".to_string()));
        }
        Ok(tokens
            .iter()
            .map(|t| match Self::script_for(t) {
                TokenScript::Deliver => DeliveryOutcome::Delivered,
                TokenScript::Reject => DeliveryOutcome::permanent("UNREGISTERED"),
                TokenScript::Unavailable => DeliveryOutcome::transient("HTTP 503"),
            })
            .collect())
    }
}

pub async fn services_with(
    gateway: Arc<dyn PushGateway>,
    dispatch: DispatchConfig,
) -> Arc<ServiceContainer> {
    let database = Database::in_memory().await.unwrap();
    Arc::new(ServiceContainer::with_gateway(
        database,
        gateway,
        dispatch,
        FeedConfig::default(),
    ))
}

pub async fn services(gateway: Arc<ScriptedGateway>) -> Arc<ServiceContainer> {
    services_with(gateway, DispatchConfig::default()).await
}

pub fn like_from(sender: &str, recipient: &str) -> NotificationEvent {
    NotificationEvent {
        recipient: recipient.to_string(),
        from_user: SenderProfile {
            id: sender.to_string(),
            display_name: sender.to_uppercase(),
            avatar_url: None,
        },
        kind: NotificationKind::Like,
        entity_id: "status-1".to_string(),
        message: "liked your status".to_string(),
    }
}
