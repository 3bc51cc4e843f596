use crate::driver_error;
use async_trait::async_trait;
use livesql_core::{ChangeChannel, ChangePayload, Result};
use sqlx::postgres::PgListener;
use tracing::{debug, warn};

/// Notifications published on the notify channel, received over a dedicated
/// `LISTEN` connection.
pub struct PgChangeChannel {
    listener: PgListener,
    channel: String,
}

impl PgChangeChannel {
    pub(crate) fn new(listener: PgListener, channel: String) -> Self {
        Self { listener, channel }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl ChangeChannel for PgChangeChannel {
    async fn next_event(&mut self) -> Result<Option<ChangePayload>> {
        loop {
            let notification = self
                .listener
                .try_recv()
                .await
                .map_err(|e| driver_error("listen failed", e))?;
            let Some(notification) = notification else {
                // reconnects and re-listens on the next call
                warn!(channel = %self.channel, "listen connection lost, notifications may be missed");
                continue;
            };
            match ChangePayload::from_json(notification.payload()) {
                Ok(payload) => {
                    debug!(table = %payload.table, action = %payload.action, "change notification");
                    return Ok(Some(payload));
                }
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "undecodable notification skipped");
                }
            }
        }
    }
}
