//! Read-state reconciliation.
//!
//! Opening the feed marks everything that is unread at that moment as read, in
//! one all-or-nothing transaction. Records appended after the unread snapshot
//! was taken stay unread.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::repositories::NotificationRepository;
use crate::{Error, Result};

/// Conflicting commits are retried this many times with a fresh snapshot.
const CONFLICT_RETRIES: u32 = 1;

/// Result of a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ReconcileOutcome {
    /// Records flipped from unread to read.
    pub marked_read: u64,
}

pub struct ReadStateReconciler {
    notifications: Arc<dyn NotificationRepository>,
}

impl ReadStateReconciler {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }

    /// Mark every currently unread record of `user_id` as read.
    ///
    /// The unread set is not bounded by any feed window. A commit that loses a
    /// race against another writer is retried once before
    /// [`Error::TransactionConflict`] is surfaced.
    pub async fn mark_feed_opened(&self, user_id: &str) -> Result<ReconcileOutcome> {
        let mut attempt = 0;
        loop {
            let unread = self.notifications.list_unread(user_id).await?;
            if unread.is_empty() {
                debug!(user_id = %user_id, "Nothing to reconcile");
                return Ok(ReconcileOutcome { marked_read: 0 });
            }

            let ids: Vec<String> = unread.into_iter().map(|r| r.id).collect();
            match self.notifications.mark_read(user_id, &ids).await {
                Ok(marked_read) => {
                    info!(user_id = %user_id, marked_read, "Marked feed as read");
                    return Ok(ReconcileOutcome { marked_read });
                }
                Err(Error::TransactionConflict(reason)) if attempt < CONFLICT_RETRIES => {
                    debug!(
                        user_id = %user_id,
                        reason = %reason,
                        "Read-state commit conflicted, retrying with fresh snapshot"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewNotification, NotificationKind, NotificationRecord};
    use crate::database::repositories::SqlxNotificationRepository;
    use crate::database::{ChangeFeed, Database, RecordChange};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    fn new_like(owner: &str) -> NewNotification {
        NewNotification {
            owner_user_id: owner.to_string(),
            from_user_id: "bob".to_string(),
            from_user_name: "Bob".to_string(),
            from_user_avatar: None,
            message: "liked your status".to_string(),
            kind: NotificationKind::Like,
            entity_id: "status-1".to_string(),
        }
    }

    /// Reports a conflict for the first `conflicts` commits.
    struct Conflicting {
        inner: SqlxNotificationRepository,
        conflicts: AtomicU32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl NotificationRepository for Conflicting {
        async fn append(&self, new: &NewNotification) -> Result<NotificationRecord> {
            self.inner.append(new).await
        }
        async fn list_recent(&self, owner: &str, limit: u32) -> Result<Vec<NotificationRecord>> {
            self.inner.list_recent(owner, limit).await
        }
        async fn list_unread(&self, owner: &str) -> Result<Vec<NotificationRecord>> {
            self.inner.list_unread(owner).await
        }
        async fn count_unread(&self, owner: &str) -> Result<i64> {
            self.inner.count_unread(owner).await
        }
        async fn mark_read(&self, owner: &str, ids: &[String]) -> Result<u64> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::conflict("injected"));
            }
            self.inner.mark_read(owner, ids).await
        }
        fn subscribe(&self, owner: &str) -> broadcast::Receiver<RecordChange> {
            self.inner.subscribe(owner)
        }
    }

    async fn conflicting(conflicts: u32) -> Arc<Conflicting> {
        let db = Database::in_memory().await.unwrap();
        Arc::new(Conflicting {
            inner: SqlxNotificationRepository::new(db, Arc::new(ChangeFeed::new())),
            conflicts: AtomicU32::new(conflicts),
            attempts: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_marks_everything_unread() {
        let repo = conflicting(0).await;
        for _ in 0..30 {
            repo.append(&new_like("alice")).await.unwrap();
        }
        repo.append(&new_like("carol")).await.unwrap();

        let reconciler = ReadStateReconciler::new(repo.clone());
        let outcome = reconciler.mark_feed_opened("alice").await.unwrap();

        assert_eq!(outcome.marked_read, 30);
        assert_eq!(repo.count_unread("alice").await.unwrap(), 0);
        assert_eq!(repo.count_unread("carol").await.unwrap(), 1);

        // Second open with nothing new is a no-op.
        let again = reconciler.mark_feed_opened("alice").await.unwrap();
        assert_eq!(again.marked_read, 0);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_once() {
        let repo = conflicting(1).await;
        repo.append(&new_like("alice")).await.unwrap();

        let reconciler = ReadStateReconciler::new(repo.clone());
        let outcome = reconciler.mark_feed_opened("alice").await.unwrap();

        assert_eq!(outcome.marked_read, 1);
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_conflict_is_surfaced() {
        let repo = conflicting(2).await;
        repo.append(&new_like("alice")).await.unwrap();

        let reconciler = ReadStateReconciler::new(repo.clone());
        let err = reconciler.mark_feed_opened("alice").await.unwrap_err();

        assert!(matches!(err, Error::TransactionConflict(_)));
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(repo.count_unread("alice").await.unwrap(), 1);
    }
}
