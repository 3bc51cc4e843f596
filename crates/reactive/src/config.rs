//! Engine configuration.

use livesql_core::{Error, Result, DEFAULT_SCHEMA};
use serde::Deserialize;
use std::time::Duration;

/// Tuning knobs of the reactive engine.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use livesql_reactive::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{"drain_batch_size": 50}"#).unwrap();
/// assert_eq!(config.drain_batch_size, 50);
/// assert_eq!(config.max_concurrent_reruns, 50);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema assumed for unqualified relation names.
    pub default_schema: String,
    /// Period of the stale queue drainer.
    pub drain_interval_ms: u64,
    /// Maximum subscriptions rerun per drain cycle.
    pub drain_batch_size: usize,
    /// Reruns allowed in flight across the drainer and foreign reactions.
    pub max_concurrent_reruns: usize,
    /// Own-writer reactions run in parallel per notification.
    pub own_reaction_concurrency: usize,
    /// Page size for incremental and paging loaders when none is given.
    pub default_page_size: u64,
    /// Longest a write waits for its own subscriptions. `None` waits forever.
    pub write_gate_timeout_ms: Option<u64>,
    /// Longest a single run may take. `None` means unbounded.
    pub rerun_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_schema: DEFAULT_SCHEMA.to_string(),
            drain_interval_ms: 10,
            drain_batch_size: 200,
            max_concurrent_reruns: 50,
            own_reaction_concurrency: 25,
            default_page_size: 10,
            write_gate_timeout_ms: Some(30_000),
            rerun_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn write_gate_timeout(&self) -> Option<Duration> {
        self.write_gate_timeout_ms.map(Duration::from_millis)
    }

    pub fn rerun_timeout(&self) -> Option<Duration> {
        self.rerun_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_schema.is_empty() {
            return Err(Error::definition("default_schema must not be empty"));
        }
        let positive = [
            ("drain_interval_ms", self.drain_interval_ms),
            ("drain_batch_size", self.drain_batch_size as u64),
            ("max_concurrent_reruns", self.max_concurrent_reruns as u64),
            ("own_reaction_concurrency", self.own_reaction_concurrency as u64),
            ("default_page_size", self.default_page_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::definition(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}
