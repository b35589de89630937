//! Environment configuration.
//!
//! Every setting is read from the process environment (after `.env` is loaded by
//! `main`). Each concern owns a `from_env` constructor; this module holds the
//! shared parsing helpers and the top-level [`AppConfig`].

use std::str::FromStr;

use tracing::warn;

use crate::Result;
use crate::api::server::ApiServerConfig;
use crate::notification::{DispatchConfig, FeedConfig, GatewayConfig};

/// Default SQLite location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:notifeed.db?mode=rwc";

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Read a trimmed, non-empty environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when it is unset.
///
/// A value that fails to parse is logged and replaced by the default.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env_string(key) {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    key = key,
                    value = %raw,
                    default = %default,
                    "Invalid environment value, using default"
                );
                default
            }
        },
    }
}

/// Process-wide configuration assembled at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub server: ApiServerConfig,
    pub gateway: GatewayConfig,
    pub dispatch: DispatchConfig,
    pub feed: FeedConfig,
}

impl AppConfig {
    /// Load every section from the environment.
    ///
    /// Missing push gateway credentials are fatal. The dispatcher's batch
    /// deadline is raised to the gateway's worst case for a full batch.
    pub fn from_env() -> Result<Self> {
        let gateway = GatewayConfig::from_env()?;
        let dispatch = DispatchConfig::from_env();
        let dispatch = dispatch
            .clone()
            .with_min_batch_timeout(gateway.batch_deadline(dispatch.batch_size));
        Ok(Self {
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_dir: env_string("LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
            server: ApiServerConfig::from_env_or_default(),
            gateway,
            dispatch,
            feed: FeedConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keys are unique to each test so parallel tests do not interfere.
    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        unsafe { std::env::set_var("NOTIFEED_TEST_PARSE_GARBAGE", "lots") };
        assert_eq!(env_parse("NOTIFEED_TEST_PARSE_GARBAGE", 7u32), 7);
    }

    #[test]
    fn test_env_parse_reads_value() {
        unsafe { std::env::set_var("NOTIFEED_TEST_PARSE_VALUE", " 42 ") };
        assert_eq!(env_parse("NOTIFEED_TEST_PARSE_VALUE", 7u32), 42);
        assert_eq!(env_parse("NOTIFEED_TEST_PARSE_UNSET", 7u32), 7);
    }

    #[test]
    fn test_env_string_ignores_blank() {
        unsafe { std::env::set_var("NOTIFEED_TEST_BLANK", "   ") };
        assert!(env_string("NOTIFEED_TEST_BLANK").is_none());
    }
}
