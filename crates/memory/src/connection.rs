//! Connections to the in-process store.
//!
//! A connection carries session-level attribution and at most one open
//! transaction. Like PostgreSQL statement triggers, every write statement on
//! a table with notification installed publishes exactly one payload, even
//! when it changed no rows; inside a transaction payloads are held back
//! until commit.

use crate::diff;
use crate::eval;
use crate::store::Journal;
use crate::Shared;
use async_trait::async_trait;
use livesql_core::statement::TOTAL_ROW_COUNT_COLUMN;
use livesql_core::{
    ChangeAction, ChangePayload, Connection, Document, Error, QueryDefinition, QueryId, Result,
    RowSet, SessionContext, Statement, TableName, Value,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default)]
struct OpenTransaction {
    journal: Journal,
    local: Option<SessionContext>,
    pending: Vec<ChangePayload>,
}

/// Decrements the running-diff counter of a query, even if the diff is
/// cancelled mid-way.
struct RunningDiff<'a> {
    shared: &'a Shared,
    query_id: &'a QueryId,
}

impl Drop for RunningDiff<'_> {
    fn drop(&mut self) {
        let mut running = self.shared.running_diffs.lock();
        if let Some(count) = running.get_mut(self.query_id) {
            *count -= 1;
            if *count == 0 {
                running.remove(self.query_id);
            }
        }
    }
}

/// A connection to a [`crate::MemoryDatabase`].
pub struct MemoryConnection {
    shared: Arc<Shared>,
    session: Option<SessionContext>,
    transaction: Option<OpenTransaction>,
}

impl MemoryConnection {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            session: None,
            transaction: None,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Attribution in effect: transaction-local settings win.
    fn context(&self) -> Option<&SessionContext> {
        self.transaction
            .as_ref()
            .and_then(|tx| tx.local.as_ref())
            .or(self.session.as_ref())
    }

    fn payload(&self, table: &TableName, action: ChangeAction) -> ChangePayload {
        let mut payload = ChangePayload::statement(table, action);
        if let Some(context) = self.context() {
            payload.client_id = context.writer_id.as_ref().map(|w| w.to_string());
            payload.statement_target = context.statement_target.as_ref().map(TableName::qualified);
            // the id belongs to the statement's own target only
            if context.statement_target.as_ref() == Some(table) {
                payload.statement_id = context.statement_id.as_ref().map(|s| s.to_string());
            }
        }
        payload
    }

    fn publish(&mut self, payload: ChangePayload) {
        match self.transaction.as_mut() {
            Some(tx) => tx.pending.push(payload),
            None => {
                trace!(table = %payload.table, action = %payload.action, "publishing change");
                // no listener is fine
                let _ = self.shared.notify.send(payload);
            }
        }
    }

    async fn diff(&mut self, query_id: &QueryId, query: &QueryDefinition) -> Result<RowSet> {
        {
            let mut running = self.shared.running_diffs.lock();
            let count = running.entry(query_id.clone()).or_insert(0);
            *count += 1;
            self.shared
                .max_concurrent_diffs
                .fetch_max(*count, Ordering::AcqRel);
        }
        let _running = RunningDiff {
            shared: &self.shared,
            query_id,
        };

        let latency = *self.shared.diff_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .shared
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::database("injected diff failure"));
        }

        let mut catalog = self.shared.catalog.lock();
        let rows = catalog.rows(&query.relation)?;
        let snapshot = catalog.snapshots.entry(query_id.clone()).or_default();
        Ok(diff::diff(&rows, query, snapshot))
    }

    fn write(&mut self, statement: &Statement) -> Result<RowSet> {
        let (relation, action, affected) = {
            let mut catalog = self.shared.catalog.lock();
            let journal = self.transaction.as_mut().map(|tx| &mut tx.journal);
            let (relation, action, affected) = match statement {
                Statement::Insert {
                    relation,
                    documents,
                } => {
                    let store = catalog.table_mut(relation)?;
                    let mut seqs = Vec::with_capacity(documents.len());
                    for document in documents {
                        match store.insert(document.clone()) {
                            Ok(seq) => seqs.push(seq),
                            Err(e) => {
                                // statements are atomic
                                for seq in seqs {
                                    store.remove_seq(seq);
                                }
                                return Err(e);
                            }
                        }
                    }
                    let affected = seqs.len() as u64;
                    if let Some(journal) = journal {
                        for seq in seqs {
                            journal.record_insert(relation, seq);
                        }
                    }
                    (relation, ChangeAction::Insert, affected)
                }
                Statement::Update {
                    relation,
                    filter,
                    changes,
                } => {
                    if changes.is_empty() {
                        return Err(Error::definition("update without changes"));
                    }
                    let previous = catalog.table_mut(relation)?.update(filter, changes)?;
                    let affected = previous.len() as u64;
                    if let Some(journal) = journal {
                        for (seq, old) in previous {
                            journal.record_replace(relation, seq, old);
                        }
                    }
                    (relation, ChangeAction::Update, affected)
                }
                Statement::Delete { relation, filter } => {
                    let deleted = catalog.table_mut(relation)?.delete(filter);
                    let affected = deleted.len() as u64;
                    if let Some(journal) = journal {
                        for (seq, old) in deleted {
                            journal.record_replace(relation, seq, old);
                        }
                    }
                    (relation, ChangeAction::Delete, affected)
                }
                Statement::Upsert {
                    relation,
                    conflict_column,
                    documents,
                } => {
                    let written = catalog.table_mut(relation)?.upsert(conflict_column, documents)?;
                    let affected = written.len() as u64;
                    if let Some(journal) = journal {
                        for (seq, old) in written {
                            match old {
                                Some(old) => journal.record_replace(relation, seq, old),
                                None => journal.record_insert(relation, seq),
                            }
                        }
                    }
                    (relation, ChangeAction::Insert, affected)
                }
                _ => return Err(Error::definition("not a write statement")),
            };
            let notify = catalog.triggers.contains(relation);
            (notify.then(|| relation.clone()), action, affected)
        };
        if let Some(table) = relation {
            let payload = self.payload(&table, action);
            self.publish(payload);
        }
        Ok(RowSet::affected(affected))
    }

    fn rollback(&mut self) {
        if let Some(tx) = self.transaction.take() {
            let discarded = tx.pending.len();
            tx.journal.rollback(&mut self.shared.catalog.lock().tables);
            debug!(discarded, "transaction rolled back");
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<RowSet> {
        match statement {
            Statement::Select(query) => {
                let rows = self.shared.catalog.lock().rows(&query.relation)?;
                Ok(RowSet::from_rows(eval::evaluate(&rows, query)))
            }
            Statement::Count(query) => {
                let rows = self.shared.catalog.lock().rows(&query.relation)?;
                let total = eval::matching(&rows, query).len() as i64;
                let mut row = Document::new();
                row.insert(TOTAL_ROW_COUNT_COLUMN.to_string(), Value::Int64(total));
                Ok(RowSet::from_rows(vec![row]))
            }
            Statement::Diff { query_id, query } => self.diff(query_id, query).await,
            Statement::DropSnapshot { query_id } => {
                let removed = self.shared.catalog.lock().snapshots.remove(query_id);
                Ok(RowSet::affected(removed.map_or(0, |s| s.len() as u64)))
            }
            Statement::Insert { .. }
            | Statement::Update { .. }
            | Statement::Delete { .. }
            | Statement::Upsert { .. } => self.write(statement),
            Statement::SetSessionContext(context) => {
                if context.local {
                    // outside a transaction a local setting ends with its statement
                    if let Some(tx) = self.transaction.as_mut() {
                        tx.local = Some(context.clone());
                    }
                } else {
                    self.session = Some(context.clone());
                }
                Ok(RowSet::default())
            }
            Statement::ResetSessionContext => {
                self.session = None;
                if let Some(tx) = self.transaction.as_mut() {
                    tx.local = None;
                }
                Ok(RowSet::default())
            }
            Statement::Begin { .. } => {
                if self.transaction.is_some() {
                    return Err(Error::invalid_state("a transaction is already in progress"));
                }
                self.transaction = Some(OpenTransaction::default());
                Ok(RowSet::default())
            }
            Statement::Commit => {
                if let Some(tx) = self.transaction.take() {
                    for payload in tx.pending {
                        let _ = self.shared.notify.send(payload);
                    }
                }
                Ok(RowSet::default())
            }
            Statement::Rollback => {
                self.rollback();
                Ok(RowSet::default())
            }
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.rollback();
    }
}
