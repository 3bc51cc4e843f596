//! Statements exchanged with a backing store.
//!
//! The engine never builds SQL text itself. It hands a `Statement` to a
//! [`Connection`](crate::backend::Connection) and gets a [`RowSet`] back; the
//! PostgreSQL backend compiles statements to SQL while embedded stores
//! interpret them directly.

use crate::filter::Filter;
use crate::ids::{QueryId, StatementId, WriterId};
use crate::name::TableName;
use crate::query::QueryDefinition;
use crate::row::Document;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Column holding the diff action (`added`, `changed` or `removed`).
pub const ACTION_COLUMN: &str = "action";
/// Column holding the row identity as text.
pub const ROW_ID_COLUMN: &str = "row_id";
/// Column holding the projected row data.
pub const DATA_COLUMN: &str = "data";
/// Column holding the result of a count statement.
pub const TOTAL_ROW_COUNT_COLUMN: &str = "total_row_count";

/// Transaction isolation levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Attribution attached to the session before a write, so that the change
/// notification it triggers names its writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub writer_id: Option<WriterId>,
    pub statement_id: Option<StatementId>,
    /// Relation the statement id applies to; notifications from other
    /// relations touched by the same statement (via triggers) omit it.
    pub statement_target: Option<TableName>,
    /// Scope the settings to the current transaction only.
    pub local: bool,
}

/// A unit of work for a backing store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Reads the rows of a query.
    Select(QueryDefinition),
    /// Counts the rows of a query, ignoring its window. Returns one row with
    /// [`TOTAL_ROW_COUNT_COLUMN`].
    Count(QueryDefinition),
    /// Executes the query and reconciles the result with the snapshot stored
    /// under `query_id` in one statement, returning the delta rows with
    /// [`ACTION_COLUMN`], [`ROW_ID_COLUMN`] and [`DATA_COLUMN`].
    Diff {
        query_id: QueryId,
        query: QueryDefinition,
    },
    /// Deletes the snapshot stored under `query_id`.
    DropSnapshot { query_id: QueryId },
    Insert {
        relation: TableName,
        documents: Vec<Document>,
    },
    Update {
        relation: TableName,
        filter: Filter,
        changes: Document,
    },
    Delete { relation: TableName, filter: Filter },
    /// Inserts `documents`; a document whose `conflict_column` value already
    /// exists updates that row with its other columns instead.
    Upsert {
        relation: TableName,
        conflict_column: String,
        documents: Vec<Document>,
    },
    SetSessionContext(SessionContext),
    /// Clears whatever [`Statement::SetSessionContext`] applied at session scope.
    ResetSessionContext,
    Begin { isolation: Option<IsolationLevel> },
    Commit,
    Rollback,
}

impl Statement {
    /// Returns true for statements that modify relation data.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. }
                | Statement::Update { .. }
                | Statement::Delete { .. }
                | Statement::Upsert { .. }
        )
    }

    /// Relation a write statement targets.
    pub fn write_target(&self) -> Option<&TableName> {
        match self {
            Statement::Insert { relation, .. }
            | Statement::Update { relation, .. }
            | Statement::Delete { relation, .. }
            | Statement::Upsert { relation, .. } => Some(relation),
            _ => None,
        }
    }
}

/// Result of executing a statement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Rows returned or, for writes, rows affected.
    pub row_count: u64,
    pub rows: Vec<Document>,
}

impl RowSet {
    /// A result that affected `row_count` rows and returned none.
    pub fn affected(row_count: u64) -> Self {
        Self {
            row_count,
            rows: Vec::new(),
        }
    }

    /// A result carrying `rows`.
    pub fn from_rows(rows: Vec<Document>) -> Self {
        Self {
            row_count: rows.len() as u64,
            rows,
        }
    }

    /// Reads the count column of a [`Statement::Count`] result.
    pub fn total_row_count(&self) -> Option<u64> {
        let value = self.rows.first()?.get(TOTAL_ROW_COUNT_COLUMN)?;
        match value {
            Value::Int64(n) if *n >= 0 => Some(*n as u64),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}
