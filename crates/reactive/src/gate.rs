//! Write gate.
//!
//! A write registers its statement id before executing. The router releases
//! the id once every own-writer reaction to the resulting notification has
//! finished, which wakes the writer.

use hashbrown::HashMap;
use livesql_core::StatementId;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

/// Statement ids of writes whose notification has not been processed yet.
#[derive(Default)]
pub struct WriteGate {
    pending: Mutex<HashMap<StatementId, oneshot::Sender<()>>>,
}

/// The writer's side of one pending statement.
#[must_use = "a ticket does nothing unless waited on or abandoned"]
pub struct WriteTicket {
    statement_id: StatementId,
    done: oneshot::Receiver<()>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending statement.
    pub fn begin(&self, statement_id: StatementId) -> WriteTicket {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(statement_id.clone(), tx);
        WriteTicket {
            statement_id,
            done: rx,
        }
    }

    /// Marks the statement's notification as processed.
    ///
    /// Returns false if nobody is waiting for it.
    pub fn release(&self, statement_id: &StatementId) -> bool {
        match self.pending.lock().remove(statement_id) {
            // the writer may have timed out and dropped its receiver
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Forgets a statement that will never be notified (it failed or changed
    /// no rows).
    pub fn abandon(&self, statement_id: &StatementId) {
        self.pending.lock().remove(statement_id);
    }

    /// Number of statements still waiting.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl WriteTicket {
    pub fn statement_id(&self) -> &StatementId {
        &self.statement_id
    }

    /// Waits for the release. Returns false if `timeout` elapsed first, in
    /// which case the statement is abandoned.
    pub async fn wait(self, gate: &WriteGate, timeout: Option<Duration>) -> bool {
        let WriteTicket {
            statement_id,
            done,
        } = self;
        let released = match timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, done).await, Ok(Ok(()))),
            None => done.await.is_ok(),
        };
        if !released {
            gate.abandon(&statement_id);
            warn!(statement_id = %statement_id, "write not observed before gate timeout");
        }
        released
    }
}
