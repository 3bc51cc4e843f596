//! Collaborator traits.
//!
//! The engine talks to its backing store only through these traits: a
//! [`ConnectionProvider`] hands out [`Connection`]s that execute
//! [`Statement`]s, and a [`ChangeChannel`] delivers the notifications the
//! store's triggers publish.

use crate::error::Result;
use crate::name::TableName;
use crate::payload::ChangePayload;
use crate::statement::{RowSet, Statement};
use async_trait::async_trait;

/// One checked-out connection. Dropping it returns it to its pool.
#[async_trait]
pub trait Connection: Send {
    /// Executes a single statement.
    async fn execute(&mut self, statement: &Statement) -> Result<RowSet>;
}

/// Source of connections plus the catalog operations the engine needs.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Checks out a connection.
    async fn acquire(&self) -> Result<Box<dyn Connection>>;

    /// Makes `relation` publish change notifications. Called once per base
    /// table before the first subscription or write touches it; must be
    /// idempotent.
    async fn prepare_relation(&self, _relation: &TableName) -> Result<()> {
        Ok(())
    }

    /// Returns the base tables `relation` reads from. A table depends on
    /// itself; a view on the transitive closure of its sources.
    async fn resolve_dependencies(&self, relation: &TableName) -> Result<Vec<TableName>> {
        Ok(vec![relation.clone()])
    }
}

/// A stream of change notifications.
#[async_trait]
pub trait ChangeChannel: Send + 'static {
    /// Waits for the next notification. `Ok(None)` means the channel closed.
    async fn next_event(&mut self) -> Result<Option<ChangePayload>>;
}
