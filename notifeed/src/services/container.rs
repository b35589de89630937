//! Service container.
//!
//! Builds the repositories and services once and hands out shared handles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{
    DeviceTokenRepository, NotificationRepository, SqlxDeviceTokenRepository,
    SqlxNotificationRepository,
};
use crate::database::{ChangeFeed, Database};
use crate::notification::{
    DispatchConfig, Dispatcher, FcmGateway, FeedConfig, FeedSubscriber, PushGateway,
    ReadStateReconciler,
};

/// Shared application services.
pub struct ServiceContainer {
    pub database: Database,
    /// Committed notification changes, fanned out per owner.
    pub changes: Arc<ChangeFeed>,
    pub device_tokens: Arc<dyn DeviceTokenRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<ReadStateReconciler>,
    pub feeds: Arc<FeedSubscriber>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

/// Point-in-time service statistics.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ServiceStats {
    pub registered_tokens: i64,
    pub active_feed_sessions: usize,
}

impl ServiceContainer {
    /// Connect to the database and build every service from `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        info!("Initializing service container");
        let database = Database::connect(&config.database_url).await?;
        let gateway = Arc::new(FcmGateway::new(&config.gateway)?);
        let container = Self::with_gateway(
            database,
            gateway,
            config.dispatch.clone(),
            config.feed.clone(),
        );
        info!("Service container initialized");
        Ok(container)
    }

    /// Build services over an open database and an arbitrary push gateway.
    pub fn with_gateway(
        database: Database,
        gateway: Arc<dyn PushGateway>,
        dispatch: DispatchConfig,
        feed: FeedConfig,
    ) -> Self {
        let changes = Arc::new(ChangeFeed::new());
        let device_tokens: Arc<dyn DeviceTokenRepository> =
            Arc::new(SqlxDeviceTokenRepository::new(database.clone()));
        let notifications: Arc<dyn NotificationRepository> = Arc::new(
            SqlxNotificationRepository::new(database.clone(), changes.clone()),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            device_tokens.clone(),
            notifications.clone(),
            gateway,
            dispatch,
        ));
        let reconciler = Arc::new(ReadStateReconciler::new(notifications.clone()));
        let feeds = Arc::new(FeedSubscriber::new(
            notifications.clone(),
            reconciler.clone(),
            feed,
        ));

        Self {
            database,
            changes,
            device_tokens,
            notifications,
            dispatcher,
            reconciler,
            feeds,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            registered_tokens: self.device_tokens.count().await?,
            active_feed_sessions: self.feeds.active_sessions(),
        })
    }

    /// Stop background work and close the database.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();
        self.feeds.shutdown();

        info!("Closing database pools...");
        self.database.write.close().await;
        self.database.read.close().await;
        info!("Services shut down");
    }
}
