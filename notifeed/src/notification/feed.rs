//! Live notification feed.
//!
//! A feed subscription keeps the most recent `limit` records of one user in
//! feed order and publishes a fresh [`FeedSnapshot`] after every visible change.
//! Snapshots travel over a `watch` channel, so a slow consumer only ever sees
//! the latest state and never holds up the change stream.
//!
//! `unread_count` is computed from the visible window only. When more than
//! `limit` records are unread it is a lower bound on the true count.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconciler::{ReadStateReconciler, ReconcileOutcome};
use crate::config::env_parse;
use crate::database::RecordChange;
use crate::database::models::{NotificationRecord, feed_order};
use crate::database::repositories::NotificationRepository;
use crate::{Error, Result};

/// Feed window sizing.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
        }
    }
}

impl FeedConfig {
    /// Reads `FEED_DEFAULT_LIMIT` and `FEED_MAX_LIMIT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_limit = env_parse("FEED_MAX_LIMIT", defaults.max_limit).max(1);
        Self {
            default_limit: env_parse("FEED_DEFAULT_LIMIT", defaults.default_limit)
                .clamp(1, max_limit),
            max_limit,
        }
    }

    /// Resolve a requested window size.
    pub fn clamp_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

/// What produced a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedChange {
    /// First snapshot after subscribing.
    Initial,
    /// A record entered the window.
    Created { id: String },
    /// Visible records were marked read.
    MarkedRead { ids: Vec<String> },
    /// The window was re-queried after falling behind the change stream.
    Resynced,
}

/// The full visible state of a feed plus the change that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FeedSnapshot {
    pub records: Vec<NotificationRecord>,
    pub unread_count: usize,
    pub change: FeedChange,
}

/// Ordered, bounded window over one user's log.
#[derive(Debug, Clone)]
pub struct FeedWindow {
    limit: usize,
    records: Vec<NotificationRecord>,
}

impl FeedWindow {
    pub fn new(limit: usize, mut records: Vec<NotificationRecord>) -> Self {
        let limit = limit.max(1);
        records.sort_by(feed_order);
        records.truncate(limit);
        Self { limit, records }
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_read).count()
    }

    pub fn snapshot(&self, change: FeedChange) -> FeedSnapshot {
        FeedSnapshot {
            records: self.records.clone(),
            unread_count: self.unread_count(),
            change,
        }
    }

    /// Replace the window contents.
    pub fn reset(&mut self, records: Vec<NotificationRecord>) {
        *self = Self::new(self.limit, records);
    }

    /// Apply a committed change. Returns `None` when nothing visible changed.
    pub fn apply(&mut self, change: RecordChange) -> Option<FeedChange> {
        match change {
            RecordChange::Created(record) => {
                if self.records.iter().any(|r| r.id == record.id) {
                    return None;
                }
                let pos = self
                    .records
                    .binary_search_by(|probe| feed_order(probe, &record))
                    .unwrap_or_else(|pos| pos);
                if pos >= self.limit {
                    return None;
                }
                let id = record.id.clone();
                self.records.insert(pos, record);
                self.records.truncate(self.limit);
                Some(FeedChange::Created { id })
            }
            RecordChange::MarkedRead { ids, .. } => {
                let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
                let mut flipped = Vec::new();
                for record in self.records.iter_mut() {
                    if !record.is_read && ids.contains(record.id.as_str()) {
                        record.is_read = true;
                        flipped.push(record.id.clone());
                    }
                }
                (!flipped.is_empty()).then_some(FeedChange::MarkedRead { ids: flipped })
            }
        }
    }
}

#[derive(Debug, Clone)]
enum FeedState {
    Starting,
    Live(FeedSnapshot),
    Terminated(String),
}

#[derive(Debug)]
struct SessionEntry {
    generation: u64,
    token: CancellationToken,
}

/// Owns the live feed subscriptions, at most one per session.
pub struct FeedSubscriber {
    notifications: Arc<dyn NotificationRepository>,
    reconciler: Arc<ReadStateReconciler>,
    config: FeedConfig,
    sessions: Arc<DashMap<String, SessionEntry>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl FeedSubscriber {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        reconciler: Arc<ReadStateReconciler>,
        config: FeedConfig,
    ) -> Self {
        Self {
            notifications,
            reconciler,
            config,
            sessions: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Open the live feed of `user_id` for `session_id`.
    ///
    /// Any subscription the session already holds is cancelled first.
    pub fn subscribe(
        &self,
        session_id: &str,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<FeedSubscription> {
        if session_id.trim().is_empty() {
            return Err(Error::validation("session_id must not be empty"));
        }
        if user_id.trim().is_empty() {
            return Err(Error::validation("user_id must not be empty"));
        }

        let limit = self.config.clamp_limit(limit);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();

        if let Some(previous) = self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                generation,
                token: token.clone(),
            },
        ) {
            debug!(session_id = %session_id, "Replacing existing feed subscription");
            previous.token.cancel();
        }

        // Subscribe before the initial query so no commit falls in between.
        let changes = self.notifications.subscribe(user_id);
        let (tx, rx) = watch::channel(FeedState::Starting);
        tokio::spawn(run_feed(
            self.notifications.clone(),
            user_id.to_string(),
            limit,
            changes,
            tx,
            token.clone(),
        ));

        info!(session_id = %session_id, user_id = %user_id, limit, "Feed subscription opened");

        Ok(FeedSubscription {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            generation,
            snapshots: rx,
            token,
            sessions: self.sessions.clone(),
            reconciler: self.reconciler.clone(),
            open: false,
            finished: false,
        })
    }

    /// Tear down the session's subscription. Returns `false` if it had none.
    pub fn end_session(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                info!(session_id = %session_id, "Feed session ended");
                true
            }
            None => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel every live subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.sessions.clear();
    }
}

/// Handle to one live feed. Dropping it cancels the feed.
pub struct FeedSubscription {
    session_id: String,
    user_id: String,
    generation: u64,
    snapshots: watch::Receiver<FeedState>,
    token: CancellationToken,
    sessions: Arc<DashMap<String, SessionEntry>>,
    reconciler: Arc<ReadStateReconciler>,
    open: bool,
    finished: bool,
}

impl FeedSubscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `Ok(None)` once the subscription has been cancelled, and
    /// [`Error::SubscriptionTerminated`] (once) if the feed failed.
    pub async fn next(&mut self) -> Result<Option<FeedSnapshot>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            if self.snapshots.changed().await.is_err() {
                // Sender gone: the feed task has exited.
                self.finished = true;
                let last = self.snapshots.borrow_and_update().clone();
                return match last {
                    FeedState::Terminated(reason) if !self.token.is_cancelled() => {
                        Err(Error::SubscriptionTerminated(reason))
                    }
                    _ => Ok(None),
                };
            }

            let state = self.snapshots.borrow_and_update().clone();
            match state {
                FeedState::Starting => continue,
                FeedState::Live(snapshot) => return Ok(Some(snapshot)),
                FeedState::Terminated(reason) => {
                    self.finished = true;
                    return Err(Error::SubscriptionTerminated(reason));
                }
            }
        }
    }

    /// The latest snapshot, if the initial query has completed.
    pub fn current(&self) -> Option<FeedSnapshot> {
        match &*self.snapshots.borrow() {
            FeedState::Live(snapshot) => Some(snapshot.clone()),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Report whether the feed surface is open.
    ///
    /// Only a closed → open transition reconciles read state; anything else
    /// returns `Ok(None)`. A failed reconcile leaves the feed closed so the
    /// next open tries again.
    pub async fn set_open(&mut self, open: bool) -> Result<Option<ReconcileOutcome>> {
        if !open || self.open {
            self.open = open;
            return Ok(None);
        }

        self.open = true;
        match self.reconciler.mark_feed_opened(&self.user_id).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                self.open = false;
                Err(e)
            }
        }
    }

    /// Cancel the feed without waiting for drop.
    pub fn close(&self) {
        self.token.cancel();
        self.sessions
            .remove_if(&self.session_id, |_, entry| entry.generation == self.generation);
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_feed(
    notifications: Arc<dyn NotificationRepository>,
    user_id: String,
    limit: u32,
    mut changes: broadcast::Receiver<RecordChange>,
    tx: watch::Sender<FeedState>,
    token: CancellationToken,
) {
    let mut window = match notifications.list_recent(&user_id, limit).await {
        Ok(records) => FeedWindow::new(limit as usize, records),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Initial feed query failed");
            tx.send_replace(FeedState::Terminated(e.to_string()));
            return;
        }
    };
    tx.send_replace(FeedState::Live(window.snapshot(FeedChange::Initial)));

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(user_id = %user_id, "Feed subscription cancelled");
                return;
            }
            _ = tx.closed() => {
                debug!(user_id = %user_id, "Feed subscription has no readers");
                return;
            }
            received = changes.recv() => match received {
                Ok(change) => {
                    if let Some(change) = window.apply(change) {
                        tx.send_replace(FeedState::Live(window.snapshot(change)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "Feed fell behind, resynchronising");
                    match notifications.list_recent(&user_id, limit).await {
                        Ok(records) => {
                            window.reset(records);
                            tx.send_replace(FeedState::Live(window.snapshot(FeedChange::Resynced)));
                        }
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Feed resync failed");
                            tx.send_replace(FeedState::Terminated(e.to_string()));
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tx.send_replace(FeedState::Terminated("change stream closed".to_string()));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NotificationKind;

    fn record(id: &str, created_at: i64, is_read: bool) -> NotificationRecord {
        NotificationRecord {
            owner_user_id: "alice".to_string(),
            id: id.to_string(),
            from_user_id: "bob".to_string(),
            from_user_name: "Bob".to_string(),
            from_user_avatar: None,
            message: "liked your status".to_string(),
            kind: NotificationKind::Like,
            entity_id: "status-1".to_string(),
            created_at,
            is_read,
        }
    }

    fn ids(window: &FeedWindow) -> Vec<&str> {
        window.records().iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_window_orders_and_truncates() {
        let window = FeedWindow::new(
            3,
            vec![
                record("b", 5, false),
                record("a", 5, false),
                record("c", 3, false),
                record("d", 7, true),
            ],
        );
        assert_eq!(ids(&window), ["d", "a", "b"]);
        assert_eq!(window.unread_count(), 2);
    }

    #[test]
    fn test_created_enters_window_in_order() {
        let mut window = FeedWindow::new(3, vec![record("x", 10, false), record("y", 5, false)]);

        let change = window.apply(RecordChange::Created(record("z", 7, false)));
        assert_eq!(change, Some(FeedChange::Created { id: "z".to_string() }));
        assert_eq!(ids(&window), ["x", "z", "y"]);

        // Older than everything in a full window: invisible.
        assert_eq!(window.apply(RecordChange::Created(record("old", 1, false))), None);
        // Duplicate delivery is ignored.
        assert_eq!(window.apply(RecordChange::Created(record("z", 7, false))), None);

        window.apply(RecordChange::Created(record("new", 11, false)));
        assert_eq!(ids(&window), ["new", "x", "z"]);
    }

    #[test]
    fn test_marked_read_updates_unread_count() {
        let mut window = FeedWindow::new(5, vec![record("a", 2, false), record("b", 1, false)]);

        let change = window.apply(RecordChange::MarkedRead {
            owner_user_id: "alice".to_string(),
            ids: Arc::from(vec!["a".to_string(), "outside".to_string()]),
        });

        assert_eq!(
            change,
            Some(FeedChange::MarkedRead {
                ids: vec!["a".to_string()]
            })
        );
        assert_eq!(window.unread_count(), 1);

        let repeat = window.apply(RecordChange::MarkedRead {
            owner_user_id: "alice".to_string(),
            ids: Arc::from(vec!["a".to_string()]),
        });
        assert_eq!(repeat, None);
    }

    #[test]
    fn test_limit_clamping() {
        let config = FeedConfig::default();
        assert_eq!(config.clamp_limit(None), 20);
        assert_eq!(config.clamp_limit(Some(0)), 1);
        assert_eq!(config.clamp_limit(Some(500)), 100);
    }
}
