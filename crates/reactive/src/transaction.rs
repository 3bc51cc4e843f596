//! Explicit transactions.
//!
//! A `Transaction` pins one connection. Its writes carry transaction-local
//! attribution and never wait on the write gate: their notifications are
//! only published on commit.

use crate::engine::EngineShared;
use crate::table::Table;
use livesql_core::{
    Connection, Document, Error, Filter, IsolationLevel, QueryDefinition, Result, SessionContext,
    Statement, StatementId, WriterId,
};
use std::sync::Arc;
use tracing::debug;

pub struct Transaction {
    shared: Arc<EngineShared>,
    conn: Option<Box<dyn Connection>>,
    writer_id: Option<WriterId>,
}

impl Transaction {
    pub(crate) async fn begin(
        shared: Arc<EngineShared>,
        writer_id: Option<WriterId>,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self> {
        let mut conn = shared.provider.acquire().await?;
        conn.execute(&Statement::Begin { isolation }).await?;
        debug!(writer_id = ?writer_id, "transaction started");
        Ok(Self {
            shared,
            conn: Some(conn),
            writer_id,
        })
    }

    pub fn writer_id(&self) -> Option<&WriterId> {
        self.writer_id.as_ref()
    }

    fn conn(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::invalid_state("transaction already finished"))
    }

    pub async fn insert(&mut self, table: &Table, documents: Vec<Document>) -> Result<u64> {
        let statement = Statement::Insert {
            relation: table.table_name().clone(),
            documents,
        };
        self.write(table, statement).await
    }

    pub async fn update(&mut self, table: &Table, filter: Filter, changes: Document) -> Result<u64> {
        let statement = Statement::Update {
            relation: table.table_name().clone(),
            filter,
            changes,
        };
        self.write(table, statement).await
    }

    pub async fn upsert(
        &mut self,
        table: &Table,
        conflict_column: impl Into<String>,
        documents: Vec<Document>,
    ) -> Result<u64> {
        let statement = Statement::Upsert {
            relation: table.table_name().clone(),
            conflict_column: conflict_column.into(),
            documents,
        };
        self.write(table, statement).await
    }

    pub async fn remove(&mut self, table: &Table, filter: Filter) -> Result<u64> {
        let statement = Statement::Delete {
            relation: table.table_name().clone(),
            filter,
        };
        self.write(table, statement).await
    }

    /// Reads inside the transaction, seeing its uncommitted writes.
    pub async fn select(&mut self, query: &QueryDefinition) -> Result<Vec<Document>> {
        query.validate()?;
        let rows = self
            .conn()?
            .execute(&Statement::Select(query.clone()))
            .await?;
        Ok(rows.rows)
    }

    async fn write(&mut self, table: &Table, statement: Statement) -> Result<u64> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let context = SessionContext {
            writer_id: self.writer_id.clone(),
            statement_id: Some(StatementId::generate()),
            statement_target: Some(table.table_name().clone()),
            local: true,
        };
        let conn = self.conn()?;
        conn.execute(&Statement::SetSessionContext(context)).await?;
        let rows = conn.execute(&statement).await?;
        Ok(rows.row_count)
    }

    pub async fn commit(mut self) -> Result<()> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| Error::invalid_state("transaction already finished"))?;
        conn.execute(&Statement::Commit).await?;
        debug!("transaction committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| Error::invalid_state("transaction already finished"))?;
        conn.execute(&Statement::Rollback).await?;
        debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // the backend rolls back a connection dropped mid-transaction
        if self.conn.take().is_some() {
            debug!("transaction dropped without commit");
        }
    }
}
