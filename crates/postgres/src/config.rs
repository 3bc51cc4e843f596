//! Backend configuration.

use livesql_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Longest channel name PostgreSQL accepts (NAMEDATALEN - 1).
const MAX_CHANNEL_LEN: usize = 63;

/// Connection and schema settings of the PostgreSQL backend.
///
/// ```
/// use livesql_postgres::PostgresConfig;
///
/// let config: PostgresConfig =
///     serde_json::from_str(r#"{"url": "postgres://app@db/app", "max_connections": 20}"#).unwrap();
/// assert_eq!(config.own_schema, "reactive");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection URL. May carry credentials; never logged.
    pub url: String,
    pub max_connections: u32,
    /// Longest a caller waits for a pooled connection.
    pub acquire_timeout_ms: u64,
    /// Schema holding the snapshot table and the notify function.
    pub own_schema: String,
    /// Channel the notify triggers publish on.
    pub notify_channel: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/postgres".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            own_schema: "reactive".to_string(),
            notify_channel: "core_reactive_event".to_string(),
        }
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("own_schema", &self.own_schema)
            .field("notify_channel", &self.notify_channel)
            .finish()
    }
}

impl PostgresConfig {
    /// Uses the defaults with `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Rejects values the backend cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::definition("url must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(Error::definition("max_connections must be positive"));
        }
        if self.own_schema.is_empty() {
            return Err(Error::definition("own_schema must not be empty"));
        }
        if self.notify_channel.is_empty() || self.notify_channel.len() > MAX_CHANNEL_LEN {
            return Err(Error::definition(format!(
                "notify_channel must be 1 to {} bytes long",
                MAX_CHANNEL_LEN
            )));
        }
        Ok(())
    }
}
