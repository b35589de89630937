//! Live change notifications for the notification log.
//!
//! Writers publish a [`RecordChange`] after their write has committed; feed
//! subscribers receive the changes for one owner through a broadcast channel.
//! Channels are created per owner on first subscribe and dropped once the last
//! receiver is gone, so there is no global lock on the publish path.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use super::models::NotificationRecord;

/// Default per-owner channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A committed change to one owner's notification log.
#[derive(Debug, Clone)]
pub enum RecordChange {
    /// A new record was appended.
    Created(NotificationRecord),
    /// The listed records transitioned from unread to read.
    MarkedRead {
        owner_user_id: String,
        ids: Arc<[String]>,
    },
}

impl RecordChange {
    pub fn owner_user_id(&self) -> &str {
        match self {
            Self::Created(record) => &record.owner_user_id,
            Self::MarkedRead { owner_user_id, .. } => owner_user_id,
        }
    }
}

/// Per-owner fan-out of committed record changes.
#[derive(Debug)]
pub struct ChangeFeed {
    channels: DashMap<String, broadcast::Sender<RecordChange>>,
    capacity: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to committed changes for `owner_user_id`.
    pub fn subscribe(&self, owner_user_id: &str) -> broadcast::Receiver<RecordChange> {
        self.channels
            .entry(owner_user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a change. A no-op when nobody is watching the owner.
    pub fn publish(&self, change: RecordChange) {
        let owner = change.owner_user_id().to_string();
        let delivered = match self.channels.get(&owner) {
            Some(sender) => sender.send(change).is_ok(),
            None => return,
        };

        if !delivered {
            // Last receiver went away; drop the channel unless someone re-subscribed.
            self.channels
                .remove_if(&owner, |_, sender| sender.receiver_count() == 0);
            trace!(owner_user_id = %owner, "Dropped idle change channel");
        }
    }

    /// Number of live receivers for an owner.
    pub fn receiver_count(&self, owner_user_id: &str) -> usize {
        self.channels
            .get(owner_user_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked(owner: &str) -> RecordChange {
        RecordChange::MarkedRead {
            owner_user_id: owner.to_string(),
            ids: Arc::from(vec!["n1".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_changes_are_scoped_to_owner() {
        let feed = ChangeFeed::new();
        let mut alice = feed.subscribe("alice");
        let mut bob = feed.subscribe("bob");

        feed.publish(marked("alice"));

        let change = alice.recv().await.unwrap();
        assert_eq!(change.owner_user_id(), "alice");
        assert!(matches!(
            bob.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_idle_channels_are_dropped() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe("alice");
        assert_eq!(feed.receiver_count("alice"), 1);
        drop(rx);

        feed.publish(marked("alice"));
        assert!(feed.channels.get("alice").is_none());
    }
}
