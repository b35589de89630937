//! REST API server module.
//!
//! HTTP and WebSocket endpoints for device tokens, push dispatch,
//! and notification feeds.

pub mod error;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
