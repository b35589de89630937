//! Notification dispatch and consumption.
//!
//! - [`Dispatcher`] writes the record and fans pushes out to device tokens.
//! - [`FeedSubscriber`] keeps a live, ordered window over a user's log.
//! - [`ReadStateReconciler`] flips unread records to read when the feed opens.
//!
//! # Example
//!
//! ```ignore
//! use notifeed::notification::{Dispatcher, NotificationEvent};
//!
//! let result = dispatcher.notify(&event).await?;
//! let mut feed = subscriber.subscribe("session-1", &event.recipient, Some(20))?;
//! while let Some(snapshot) = feed.next().await? {
//!     println!("{} unread", snapshot.unread_count);
//! }
//! ```

pub mod dispatcher;
pub mod events;
pub mod feed;
pub mod gateway;
pub mod reconciler;

pub use dispatcher::{DispatchConfig, DispatchReport, Dispatcher, NotifyResult, SendOutcome};
pub use events::{NotificationEvent, PushMessage, SenderProfile};
pub use feed::{FeedChange, FeedConfig, FeedSnapshot, FeedSubscriber, FeedSubscription, FeedWindow};
pub use gateway::{
    DeliveryOutcome, FailureClass, FcmGateway, GATEWAY_BATCH_CEILING, GatewayConfig, PushGateway,
    classify_response,
};
pub use reconciler::{ReadStateReconciler, ReconcileOutcome};
