//! Notification log repository.
//!
//! Append-only per-user log ordered by `created_at`. The only mutation after
//! insert is the unread → read flip, which always commits as one transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::models::{NewNotification, NotificationRecord};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::MonotonicClock;
use crate::database::{ChangeFeed, Database, RecordChange, begin_immediate};
use crate::{Error, Result};

/// Ids flipped per UPDATE statement inside the read-state transaction.
///
/// Keeps each statement well under SQLite's bound-parameter limit.
pub const DEFAULT_MARK_READ_CHUNK: usize = 400;

/// Notification repository trait.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Append a record, assigning its id and `created_at`.
    async fn append(&self, new: &NewNotification) -> Result<NotificationRecord>;

    /// The most recent `limit` records in feed order.
    async fn list_recent(&self, owner_user_id: &str, limit: u32) -> Result<Vec<NotificationRecord>>;

    /// Every unread record of the owner, in feed order.
    async fn list_unread(&self, owner_user_id: &str) -> Result<Vec<NotificationRecord>>;

    async fn count_unread(&self, owner_user_id: &str) -> Result<i64>;

    /// Flip every listed record from unread to read in one transaction.
    ///
    /// Either all listed records flip or none do. If any of them is no longer
    /// unread (or missing) the transaction is rolled back and
    /// [`Error::TransactionConflict`] is returned.
    async fn mark_read(&self, owner_user_id: &str, ids: &[String]) -> Result<u64>;

    /// Committed changes for the owner.
    fn subscribe(&self, owner_user_id: &str) -> broadcast::Receiver<RecordChange>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    db: Database,
    clock: MonotonicClock,
    changes: Arc<ChangeFeed>,
    mark_read_chunk: usize,
}

impl SqlxNotificationRepository {
    pub fn new(db: Database, changes: Arc<ChangeFeed>) -> Self {
        Self {
            db,
            clock: MonotonicClock::new(),
            changes,
            mark_read_chunk: DEFAULT_MARK_READ_CHUNK,
        }
    }

    /// Override how many ids each UPDATE statement covers.
    pub fn with_mark_read_chunk(mut self, chunk: usize) -> Self {
        self.mark_read_chunk = chunk.max(1);
        self
    }

    async fn mark_read_once(&self, owner_user_id: &str, ids: &[String]) -> Result<u64> {
        let mut tx = begin_immediate(&self.db.write).await?;
        let mut flipped = 0u64;

        for chunk in ids.chunks(self.mark_read_chunk) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE notifications SET is_read = 1 \
                 WHERE owner_user_id = ? AND is_read = 0 AND id IN ({})",
                placeholders
            );

            let mut query = sqlx::query(&sql).bind(owner_user_id);
            for id in chunk {
                query = query.bind(id);
            }

            match query.execute(&mut *tx).await {
                Ok(result) => flipped += result.rows_affected(),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback after failed read-state update failed");
                    }
                    return Err(e.into());
                }
            }
        }

        if flipped != ids.len() as u64 {
            tx.rollback().await?;
            return Err(Error::conflict(format!(
                "expected to flip {} unread notifications for {}, found {}",
                ids.len(),
                owner_user_id,
                flipped
            )));
        }

        tx.commit().await?;
        Ok(flipped)
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn append(&self, new: &NewNotification) -> Result<NotificationRecord> {
        if new.owner_user_id.trim().is_empty() {
            return Err(Error::validation("owner_user_id must not be empty"));
        }

        let record = NotificationRecord {
            owner_user_id: new.owner_user_id.clone(),
            id: Uuid::new_v4().to_string(),
            from_user_id: new.from_user_id.clone(),
            from_user_name: new.from_user_name.clone(),
            from_user_avatar: new.from_user_avatar.clone(),
            message: new.message.clone(),
            kind: new.kind,
            entity_id: new.entity_id.clone(),
            created_at: self.clock.next_ms(),
            is_read: false,
        };

        let insert = &record;
        retry_on_sqlite_busy("append_notification", || async move {
            sqlx::query(
                r#"
                INSERT INTO notifications (
                    owner_user_id, id, from_user_id, from_user_name, from_user_avatar,
                    message, kind, entity_id, created_at, is_read
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(&insert.owner_user_id)
            .bind(&insert.id)
            .bind(&insert.from_user_id)
            .bind(&insert.from_user_name)
            .bind(&insert.from_user_avatar)
            .bind(&insert.message)
            .bind(insert.kind.as_ref())
            .bind(&insert.entity_id)
            .bind(insert.created_at)
            .execute(&self.db.write)
            .await?;
            Ok(())
        })
        .await?;

        debug!(
            owner_user_id = %record.owner_user_id,
            notification_id = %record.id,
            kind = %record.kind,
            "Appended notification"
        );
        self.changes.publish(RecordChange::Created(record.clone()));
        Ok(record)
    }

    async fn list_recent(&self, owner_user_id: &str, limit: u32) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT * FROM notifications
            WHERE owner_user_id = ?
            ORDER BY created_at DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(owner_user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.db.read)
        .await?;
        Ok(rows)
    }

    async fn list_unread(&self, owner_user_id: &str) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT * FROM notifications
            WHERE owner_user_id = ? AND is_read = 0
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(owner_user_id)
        .fetch_all(&self.db.read)
        .await?;
        Ok(rows)
    }

    async fn count_unread(&self, owner_user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE owner_user_id = ? AND is_read = 0",
        )
        .bind(owner_user_id)
        .fetch_one(&self.db.read)
        .await?;
        Ok(count)
    }

    async fn mark_read(&self, owner_user_id: &str, ids: &[String]) -> Result<u64> {
        let ids: Vec<String> = ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let ids_ref = ids.as_slice();
        let flipped = retry_on_sqlite_busy("mark_notifications_read", || async move {
            self.mark_read_once(owner_user_id, ids_ref).await
        })
        .await?;

        self.changes.publish(RecordChange::MarkedRead {
            owner_user_id: owner_user_id.to_string(),
            ids: Arc::from(ids),
        });
        Ok(flipped)
    }

    fn subscribe(&self, owner_user_id: &str) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe(owner_user_id)
    }
}
