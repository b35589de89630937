//! Database models for notifeed.
//!
//! These models map directly to the database schema.

pub mod device_token;
pub mod notification;

pub use device_token::*;
pub use notification::*;
