//! notifeed library crate.
//!
//! Device token registry, push dispatch, and live notification feeds with
//! atomic read-state reconciliation.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
