//! Repository layer for database access.
//!
//! Each repository is a trait with a SQLx implementation so services can be
//! wired against `Arc<dyn ...>` and tested with in-memory doubles.

pub mod device_token;
pub mod notification;

pub use device_token::*;
pub use notification::*;
