//! Device token registry.
//!
//! One slot per user, last registration wins. Invalidation is a guarded
//! compare-and-delete so a stale delivery failure can never clear a token that
//! was registered after the failing push was sent.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::database::Database;
use crate::database::models::DeviceTokenDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Device token repository trait.
#[async_trait]
pub trait DeviceTokenRepository: Send + Sync {
    /// Upsert the user's token. Re-registering the same token leaves the row untouched.
    async fn register(&self, user_id: &str, token: &str) -> Result<DeviceTokenDbModel>;

    async fn get(&self, user_id: &str) -> Result<Option<DeviceTokenDbModel>>;

    /// Clear the user's token only if it still equals `observed_token`.
    ///
    /// Returns `false` when a newer registration has replaced it (or it is already gone).
    async fn invalidate(&self, user_id: &str, observed_token: &str) -> Result<bool>;

    /// Explicit opt-out. Removes whatever token is stored.
    async fn unregister(&self, user_id: &str) -> Result<bool>;

    /// Keyset page of registered tokens ordered by `user_id`.
    async fn list_page(&self, after_user_id: Option<&str>, limit: u32)
    -> Result<Vec<DeviceTokenDbModel>>;

    async fn count(&self) -> Result<i64>;
}

/// SQLx implementation of DeviceTokenRepository.
pub struct SqlxDeviceTokenRepository {
    db: Database,
}

impl SqlxDeviceTokenRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeviceTokenRepository for SqlxDeviceTokenRepository {
    async fn register(&self, user_id: &str, token: &str) -> Result<DeviceTokenDbModel> {
        let token = token.trim();
        if user_id.trim().is_empty() {
            return Err(Error::validation("user_id must not be empty"));
        }
        if token.is_empty() {
            return Err(Error::validation("device token must not be empty"));
        }

        let now = now_ms();
        let changed = retry_on_sqlite_busy("register_device_token", || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO device_tokens (user_id, token, registered_at)
                VALUES (?, ?, ?)
                ON CONFLICT(user_id) DO UPDATE SET
                    token = excluded.token,
                    registered_at = excluded.registered_at
                WHERE device_tokens.token <> excluded.token
                "#,
            )
            .bind(user_id)
            .bind(token)
            .bind(now)
            .execute(&self.db.write)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if changed > 0 {
            info!(user_id = %user_id, "Registered device token");
        } else {
            debug!(user_id = %user_id, "Device token already registered");
        }

        sqlx::query_as::<_, DeviceTokenDbModel>(
            "SELECT * FROM device_tokens WHERE user_id = ? LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.db.write)
        .await?
        .ok_or_else(|| Error::not_found("DeviceToken", user_id))
    }

    async fn get(&self, user_id: &str) -> Result<Option<DeviceTokenDbModel>> {
        let row = sqlx::query_as::<_, DeviceTokenDbModel>(
            "SELECT * FROM device_tokens WHERE user_id = ? LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.db.read)
        .await?;
        Ok(row)
    }

    async fn invalidate(&self, user_id: &str, observed_token: &str) -> Result<bool> {
        let removed = retry_on_sqlite_busy("invalidate_device_token", || async move {
            let result = sqlx::query("DELETE FROM device_tokens WHERE user_id = ? AND token = ?")
                .bind(user_id)
                .bind(observed_token)
                .execute(&self.db.write)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await?;

        if removed {
            info!(user_id = %user_id, "Invalidated device token");
        } else {
            debug!(
                user_id = %user_id,
                "Skipped invalidation, stored token no longer matches"
            );
        }
        Ok(removed)
    }

    async fn unregister(&self, user_id: &str) -> Result<bool> {
        let removed = retry_on_sqlite_busy("unregister_device_token", || async move {
            let result = sqlx::query("DELETE FROM device_tokens WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.db.write)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await?;
        Ok(removed)
    }

    async fn list_page(
        &self,
        after_user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeviceTokenDbModel>> {
        let rows = match after_user_id {
            Some(after) => {
                sqlx::query_as::<_, DeviceTokenDbModel>(
                    "SELECT * FROM device_tokens WHERE user_id > ? ORDER BY user_id LIMIT ?",
                )
                .bind(after)
                .bind(i64::from(limit))
                .fetch_all(&self.db.read)
                .await?
            }
            None => {
                sqlx::query_as::<_, DeviceTokenDbModel>(
                    "SELECT * FROM device_tokens ORDER BY user_id LIMIT ?",
                )
                .bind(i64::from(limit))
                .fetch_all(&self.db.read)
                .await?
            }
        };
        Ok(rows)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM device_tokens")
            .fetch_one(&self.db.read)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> SqlxDeviceTokenRepository {
        SqlxDeviceTokenRepository::new(Database::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let repo = repo().await;

        let first = repo.register("alice", "tok-1").await.unwrap();
        let second = repo.register("alice", "tok-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let repo = repo().await;
        repo.register("alice", "tok-1").await.unwrap();
        repo.register("alice", "tok-2").await.unwrap();

        let stored = repo.get("alice").await.unwrap().unwrap();
        assert_eq!(stored.token, "tok-2");
    }

    #[tokio::test]
    async fn test_stale_invalidation_is_noop() {
        let repo = repo().await;
        repo.register("alice", "tok-1").await.unwrap();
        repo.register("alice", "tok-2").await.unwrap();

        // Failure report for the old token arrives after the new registration.
        assert!(!repo.invalidate("alice", "tok-1").await.unwrap());
        assert_eq!(repo.get("alice").await.unwrap().unwrap().token, "tok-2");

        assert!(repo.invalidate("alice", "tok-2").await.unwrap());
        assert!(repo.get("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_token_is_rejected() {
        let repo = repo().await;
        let err = repo.register("alice", "   ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_page_walks_all_users() {
        let repo = repo().await;
        for i in 0..5 {
            repo.register(&format!("user-{i}"), &format!("tok-{i}"))
                .await
                .unwrap();
        }

        let first = repo.list_page(None, 2).await.unwrap();
        let second = repo
            .list_page(Some(&first.last().unwrap().user_id), 2)
            .await
            .unwrap();
        let third = repo
            .list_page(Some(&second.last().unwrap().user_id), 2)
            .await
            .unwrap();

        assert_eq!(first.len() + second.len() + third.len(), 5);
        assert_eq!(third[0].user_id, "user-4");
    }
}
