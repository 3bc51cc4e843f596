use async_trait::async_trait;
use livesql_core::{ChangeChannel, ChangePayload, Result};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Change notifications of a [`crate::MemoryDatabase`], from the moment the
/// channel was opened.
pub struct MemoryChannel {
    receiver: broadcast::Receiver<ChangePayload>,
}

impl MemoryChannel {
    pub(crate) fn new(receiver: broadcast::Receiver<ChangePayload>) -> Self {
        Self { receiver }
    }

    /// Notifications received but not read yet.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

#[async_trait]
impl ChangeChannel for MemoryChannel {
    async fn next_event(&mut self) -> Result<Option<ChangePayload>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change channel lagged, notifications lost");
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }
}
