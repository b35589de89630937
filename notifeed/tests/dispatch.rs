//! Dispatcher behaviour against a real SQLite registry and a scripted gateway.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::{ScriptedGateway, services, services_with};
use notifeed::Result;
use notifeed::database::repositories::DeviceTokenRepository;
use notifeed::notification::{
    DeliveryOutcome, DispatchConfig, DispatchReport, PushGateway, PushMessage, SendOutcome,
};

fn message() -> PushMessage {
    PushMessage::new("Release", "Version 2 is out")
}

#[tokio::test]
async fn broadcast_splits_501_tokens_into_two_batches() {
    let gateway = Arc::new(ScriptedGateway::new());
    let services = services(gateway.clone()).await;
    for i in 0..501 {
        services
            .device_tokens
            .register(&format!("user-{i:04}"), &format!("tok-{i:04}"))
            .await
            .unwrap();
    }

    let report = services.dispatcher.broadcast(&message()).await.unwrap();

    assert_eq!(gateway.batch_sizes(), vec![1, 500]);
    assert_eq!(report.batch_count, 2);
    assert_eq!(report.success_count, 501);
    assert_eq!(report.failure_count, 0);
}

#[tokio::test]
async fn broadcast_counts_a_failed_batch_and_keeps_going() {
    let gateway = Arc::new(ScriptedGateway::new());
    let config = DispatchConfig {
        batch_size: 2,
        ..DispatchConfig::default()
    };
    let services = services_with(gateway.clone(), config).await;

    // Keyset order is by user id, so batch two is user-2 and user-3.
    let tokens = ["tok-0", "tok-1", "boom-2", "tok-3", "tok-4", "dead-5"];
    for (i, token) in tokens.iter().enumerate() {
        services
            .device_tokens
            .register(&format!("user-{i}"), token)
            .await
            .unwrap();
    }

    let report = services.dispatcher.broadcast(&message()).await.unwrap();

    assert_eq!(gateway.calls.lock().len(), 3);
    assert_eq!(report.batch_count, 3);
    assert_eq!(report.failed_batch_count, 1);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.failure_count, 3);
    assert_eq!(report.invalidated_count, 1);

    // A whole-batch failure never removes tokens.
    assert!(services.device_tokens.get("user-2").await.unwrap().is_some());
    assert!(services.device_tokens.get("user-3").await.unwrap().is_some());
    assert!(services.device_tokens.get("user-5").await.unwrap().is_none());
}

#[tokio::test]
async fn broadcast_with_no_tokens_makes_no_calls() {
    let gateway = Arc::new(ScriptedGateway::new());
    let services = services(gateway.clone()).await;

    let report = services.dispatcher.broadcast(&message()).await.unwrap();

    assert_eq!(report, DispatchReport::default());
    assert!(gateway.calls.lock().is_empty());
}

#[tokio::test]
async fn send_to_user_maps_gateway_answers() {
    let gateway = Arc::new(ScriptedGateway::new());
    let services = services(gateway).await;
    let tokens = &services.device_tokens;
    tokens.register("alice", "tok-alice").await.unwrap();
    tokens.register("bob", "dead-bob").await.unwrap();
    tokens.register("carol", "busy-carol").await.unwrap();

    let dispatcher = &services.dispatcher;
    assert_eq!(
        dispatcher.send_to_user("alice", &message()).await.unwrap(),
        SendOutcome::Delivered
    );
    assert_eq!(
        dispatcher.send_to_user("nobody", &message()).await.unwrap(),
        SendOutcome::NoToken
    );
    assert_eq!(
        dispatcher.send_to_user("bob", &message()).await.unwrap(),
        SendOutcome::InvalidToken
    );
    assert!(tokens.get("bob").await.unwrap().is_none());
    assert_eq!(
        dispatcher.send_to_user("bob", &message()).await.unwrap(),
        SendOutcome::NoToken
    );
    assert!(matches!(
        dispatcher.send_to_user("carol", &message()).await.unwrap(),
        SendOutcome::TransientFailure { .. }
    ));
    assert!(tokens.get("carol").await.unwrap().is_some());
}

/// Rejects every token, but re-registers the user's device mid-flight.
struct ReRegisteringGateway {
    tokens: Mutex<Option<Arc<dyn DeviceTokenRepository>>>,
}

#[async_trait]
impl PushGateway for ReRegisteringGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        _message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>> {
        let registry = self.tokens.lock().clone();
        if let Some(registry) = registry {
            registry.register("alice", "tok-fresh").await?;
        }
        Ok(tokens
            .iter()
            .map(|_| DeliveryOutcome::permanent("UNREGISTERED"))
            .collect())
    }
}

#[tokio::test]
async fn stale_rejection_does_not_remove_newer_registration() {
    let gateway = Arc::new(ReRegisteringGateway {
        tokens: Mutex::new(None),
    });
    let services = services_with(gateway.clone(), DispatchConfig::default()).await;
    *gateway.tokens.lock() = Some(services.device_tokens.clone());
    services
        .device_tokens
        .register("alice", "tok-stale")
        .await
        .unwrap();

    let outcome = services
        .dispatcher
        .send_to_user("alice", &message())
        .await
        .unwrap();

    assert_eq!(outcome, SendOutcome::InvalidToken);
    let stored = services.device_tokens.get("alice").await.unwrap().unwrap();
    assert_eq!(stored.token, "tok-fresh");
}

#[tokio::test]
async fn notify_without_token_still_records() {
    let gateway = Arc::new(ScriptedGateway::new());
    let services = services(gateway.clone()).await;

    let result = services
        .dispatcher
        .notify(&common::like_from("bob", "alice"))
        .await
        .unwrap();

    assert_eq!(result.outcome, SendOutcome::NoToken);
    assert!(!result.record.is_read);
    assert!(gateway.calls.lock().is_empty());
    assert_eq!(services.notifications.count_unread("alice").await.unwrap(), 1);
}
