//! Push fan-out.
//!
//! The dispatcher resolves users to device tokens, submits them to the push
//! gateway in bounded batches and prunes tokens the gateway reports as
//! permanently invalid. Delivery is best-effort: batches are independent, and a
//! failing batch never aborts the others.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::events::{NotificationEvent, PushMessage};
use super::gateway::{DeliveryOutcome, FailureClass, GATEWAY_BATCH_CEILING, PushGateway};
use crate::Result;
use crate::config::env_parse;
use crate::database::models::{DeviceTokenDbModel, NotificationRecord};
use crate::database::repositories::{DeviceTokenRepository, NotificationRepository};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Tokens per gateway submission, at most [`GATEWAY_BATCH_CEILING`].
    pub batch_size: usize,
    /// Batches in flight at once.
    pub max_concurrent_batches: usize,
    /// Deadline for one gateway submission. Must leave room for the gateway's
    /// own per-token request timeouts, see
    /// [`super::GatewayConfig::batch_deadline`].
    pub batch_timeout: Duration,
    /// Rows fetched per registry page while enumerating tokens.
    pub token_page_size: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: GATEWAY_BATCH_CEILING,
            max_concurrent_batches: 4,
            batch_timeout: Duration::from_secs(90),
            token_page_size: 1000,
        }
    }
}

impl DispatchConfig {
    /// Load dispatcher config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `PUSH_BATCH_SIZE` (clamped to the gateway ceiling)
    /// - `PUSH_MAX_CONCURRENT_BATCHES`
    /// - `PUSH_BATCH_TIMEOUT_SECS`
    /// - `TOKEN_SCAN_PAGE_SIZE`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("PUSH_BATCH_SIZE", defaults.batch_size),
            max_concurrent_batches: env_parse(
                "PUSH_MAX_CONCURRENT_BATCHES",
                defaults.max_concurrent_batches,
            ),
            batch_timeout: Duration::from_secs(env_parse(
                "PUSH_BATCH_TIMEOUT_SECS",
                defaults.batch_timeout.as_secs(),
            )),
            token_page_size: env_parse("TOKEN_SCAN_PAGE_SIZE", defaults.token_page_size),
        }
        .normalized()
    }

    /// Clamp every field into its usable range.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(1, GATEWAY_BATCH_CEILING);
        self.max_concurrent_batches = self.max_concurrent_batches.max(1);
        self.token_page_size = self.token_page_size.max(1);
        if self.batch_timeout.is_zero() {
            self.batch_timeout = Duration::from_secs(1);
        }
        self
    }

    /// Raise the batch deadline to at least `floor`.
    ///
    /// A deadline shorter than the gateway's worst case would cut off batches
    /// whose per-token results are still arriving.
    pub fn with_min_batch_timeout(mut self, floor: Duration) -> Self {
        if self.batch_timeout < floor {
            warn!(
                configured = ?self.batch_timeout,
                raised_to = ?floor,
                "Push batch timeout below gateway worst case, raising it"
            );
            self.batch_timeout = floor;
        }
        self
    }
}

/// Aggregate result of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DispatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    /// Tokens removed from the registry after a permanent failure.
    pub invalidated_count: usize,
    pub batch_count: usize,
    /// Batches that failed as a whole (gateway error or timeout).
    pub failed_batch_count: usize,
}

impl DispatchReport {
    fn absorb(&mut self, batch: BatchResult) {
        self.success_count += batch.success_count;
        self.failure_count += batch.failure_count;
        self.invalidated_count += batch.invalidated_count;
        self.batch_count += 1;
        if batch.failed {
            self.failed_batch_count += 1;
        }
    }
}

/// Result of pushing to a single user.
///
/// None of these are errors: a missing or revoked token is an expected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered,
    /// The user never opted in, or their token was cleared.
    NoToken,
    /// The gateway rejected the token for good; it has been removed.
    InvalidToken,
    /// Retrying later may succeed. Retry policy belongs to the caller.
    TransientFailure {
        reason: String,
        retry_after_secs: Option<u64>,
    },
}

impl SendOutcome {
    fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
            retry_after_secs: None,
        }
    }
}

/// Stored record plus what happened to the push.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotifyResult {
    pub record: NotificationRecord,
    pub outcome: SendOutcome,
}

#[derive(Debug, Default)]
struct BatchResult {
    success_count: usize,
    failure_count: usize,
    invalidated_count: usize,
    failed: bool,
}

/// Fans notifications out to device tokens through a [`PushGateway`].
pub struct Dispatcher {
    tokens: Arc<dyn DeviceTokenRepository>,
    notifications: Arc<dyn NotificationRepository>,
    gateway: Arc<dyn PushGateway>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        tokens: Arc<dyn DeviceTokenRepository>,
        notifications: Arc<dyn NotificationRepository>,
        gateway: Arc<dyn PushGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            tokens,
            notifications,
            gateway,
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Push `message` to every registered token.
    ///
    /// Only a failure to enumerate the registry is an `Err`; gateway failures
    /// are counted in the report.
    pub async fn broadcast(&self, message: &PushMessage) -> Result<DispatchReport> {
        let registered = self.scan_tokens().await?;
        if registered.is_empty() {
            debug!("Broadcast skipped, no registered tokens");
            return Ok(DispatchReport::default());
        }

        let batches: Vec<Vec<DeviceTokenDbModel>> = registered
            .chunks(self.config.batch_size)
            .map(<[DeviceTokenDbModel]>::to_vec)
            .collect();
        let total_batches = batches.len();

        let report = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.run_batch(index, total_batches, batch, message))
            .buffer_unordered(self.config.max_concurrent_batches)
            .fold(DispatchReport::default(), |mut report, batch| async move {
                report.absorb(batch);
                report
            })
            .await;

        info!(
            tokens = registered.len(),
            batches = report.batch_count,
            failed_batches = report.failed_batch_count,
            success = report.success_count,
            failure = report.failure_count,
            invalidated = report.invalidated_count,
            "Broadcast finished"
        );
        Ok(report)
    }

    /// Push `message` to one user's device.
    pub async fn send_to_user(&self, user_id: &str, message: &PushMessage) -> Result<SendOutcome> {
        let Some(registered) = self.tokens.get(user_id).await? else {
            debug!(user_id = %user_id, "No device token registered");
            return Ok(SendOutcome::NoToken);
        };

        let tokens = [registered.token.clone()];
        let outcome = match timeout(
            self.config.batch_timeout,
            self.gateway.send_batch(&tokens, message),
        )
        .await
        {
            Err(_) => DeliveryOutcome::transient("gateway timed out"),
            Ok(Err(e)) => DeliveryOutcome::transient(e.to_string()),
            Ok(Ok(outcomes)) => outcomes
                .into_iter()
                .next()
                .unwrap_or_else(|| DeliveryOutcome::transient("gateway returned no result")),
        };

        let result = match outcome {
            DeliveryOutcome::Delivered => SendOutcome::Delivered,
            DeliveryOutcome::Failed {
                class: FailureClass::Permanent,
                reason,
                ..
            } => {
                info!(user_id = %user_id, reason = %reason, "Device token rejected permanently");
                self.invalidate(user_id, &registered.token).await;
                SendOutcome::InvalidToken
            }
            DeliveryOutcome::Failed {
                class: FailureClass::Transient,
                reason,
                retry_after,
            } => {
                debug!(user_id = %user_id, reason = %reason, "Transient push failure");
                SendOutcome::TransientFailure {
                    reason,
                    retry_after_secs: retry_after.map(|d| d.as_secs()),
                }
            }
        };
        Ok(result)
    }

    /// Record the event in the recipient's feed, then push it.
    ///
    /// The record is written first so the feed shows the event even when the
    /// push fails. A store failure on the push path is reported as a transient
    /// outcome because the record already exists.
    pub async fn notify(&self, event: &NotificationEvent) -> Result<NotifyResult> {
        let record = self
            .notifications
            .append(&event.to_new_notification())
            .await?;
        debug!(
            user_id = %event.recipient,
            notification_id = %record.id,
            kind = event.kind.label(),
            "Notification recorded"
        );

        let outcome = match self
            .send_to_user(&event.recipient, &event.push_message())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    user_id = %event.recipient,
                    notification_id = %record.id,
                    error = %e,
                    "Push after record write failed"
                );
                SendOutcome::transient(e.to_string())
            }
        };

        Ok(NotifyResult { record, outcome })
    }

    async fn scan_tokens(&self) -> Result<Vec<DeviceTokenDbModel>> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .tokens
                .list_page(after.as_deref(), self.config.token_page_size)
                .await?;
            let done = page.len() < self.config.token_page_size as usize;
            after = page.last().map(|row| row.user_id.clone());
            all.extend(page);
            if done || after.is_none() {
                return Ok(all);
            }
        }
    }

    async fn run_batch(
        &self,
        index: usize,
        total: usize,
        batch: Vec<DeviceTokenDbModel>,
        message: &PushMessage,
    ) -> BatchResult {
        let tokens: Vec<String> = batch.iter().map(|row| row.token.clone()).collect();

        let outcomes = match timeout(
            self.config.batch_timeout,
            self.gateway.send_batch(&tokens, message),
        )
        .await
        {
            Ok(Ok(outcomes)) => outcomes,
            Ok(Err(e)) => {
                warn!(batch = index + 1, total, error = %e, "Push batch failed");
                return BatchResult {
                    failure_count: batch.len(),
                    failed: true,
                    ..Default::default()
                };
            }
            Err(_) => {
                warn!(
                    batch = index + 1,
                    total,
                    timeout = ?self.config.batch_timeout,
                    "Push batch timed out"
                );
                return BatchResult {
                    failure_count: batch.len(),
                    failed: true,
                    ..Default::default()
                };
            }
        };

        let mut result = BatchResult::default();
        let mut outcomes = outcomes.into_iter();
        for row in &batch {
            match outcomes.next() {
                Some(DeliveryOutcome::Delivered) => result.success_count += 1,
                Some(outcome) if outcome.is_permanent() => {
                    result.failure_count += 1;
                    if self.invalidate(&row.user_id, &row.token).await {
                        result.invalidated_count += 1;
                    }
                }
                // Transient, or missing from a short gateway reply.
                _ => result.failure_count += 1,
            }
        }

        debug!(
            batch = index + 1,
            total,
            success = result.success_count,
            failure = result.failure_count,
            "Push batch finished"
        );
        result
    }

    /// Guarded invalidation. Store errors are logged and do not spread to other tokens.
    async fn invalidate(&self, user_id: &str, token: &str) -> bool {
        match self.tokens.invalidate(user_id, token).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to invalidate device token");
                false
            }
        }
    }
}
