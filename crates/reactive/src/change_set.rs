//! Change set for tracking query result changes.
//!
//! A ChangeSet is the decoded output of one diff statement: the rows that
//! were added to, changed within, or removed from a query's result since its
//! previous run, in the order they must be delivered.

use livesql_core::statement::{ACTION_COLUMN, DATA_COLUMN, ROW_ID_COLUMN};
use livesql_core::{Document, Error, Result, RowId, RowSet, Value};
use std::collections::HashSet;

/// What happened to a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiffAction {
    Added,
    Changed,
    Removed,
}

impl DiffAction {
    /// Parses the wire name of an action.
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "added" => Some(DiffAction::Added),
            "changed" => Some(DiffAction::Changed),
            "removed" => Some(DiffAction::Removed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffAction::Added => "added",
            DiffAction::Changed => "changed",
            DiffAction::Removed => "removed",
        }
    }
}

/// One row of diff output.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffRow {
    pub action: DiffAction,
    pub row_id: RowId,
    /// Present for added and changed rows.
    pub data: Option<Document>,
}

/// A set of changes to query results.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    rows: Vec<DiffRow>,
}

impl ChangeSet {
    /// Creates a new empty change set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and checks the rows of a diff statement.
    ///
    /// A row id appearing twice, an unknown action, or an added/changed row
    /// without data means the snapshot and the result disagree; that is an
    /// integrity violation, never a retryable error.
    pub fn from_row_set(result: RowSet) -> Result<Self> {
        let mut seen = HashSet::with_capacity(result.rows.len());
        let mut changes = Self::new();
        for mut row in result.rows {
            let action = match row.get(ACTION_COLUMN) {
                Some(Value::String(a)) => DiffAction::parse(a).ok_or_else(|| {
                    Error::integrity(format!("unknown diff action {:?}", a))
                })?,
                other => {
                    return Err(Error::integrity(format!(
                        "diff row without action: {:?}",
                        other
                    )))
                }
            };
            let row_id = match row.remove(ROW_ID_COLUMN) {
                Some(Value::Null) | None => {
                    return Err(Error::integrity("diff row without row id"));
                }
                Some(id) => id.to_key_string(),
            };
            if !seen.insert(row_id.clone()) {
                return Err(Error::integrity(format!(
                    "row {} appears more than once in one diff",
                    row_id
                )));
            }
            let data = match (action, row.remove(DATA_COLUMN)) {
                (DiffAction::Removed, _) => None,
                (_, Some(Value::Json(serde_json::Value::Object(map)))) => Some(
                    map.into_iter()
                        .map(|(column, value)| (column, Value::from(value)))
                        .collect(),
                ),
                (_, other) => {
                    return Err(Error::integrity(format!(
                        "{} row {} carries no document: {:?}",
                        action.as_str(),
                        row_id,
                        other
                    )))
                }
            };
            changes.rows.push(DiffRow {
                action,
                row_id,
                data,
            });
        }
        Ok(changes)
    }

    /// Returns true if there are no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the total number of changes.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows with the given action.
    pub fn count(&self, action: DiffAction) -> usize {
        self.rows.iter().filter(|r| r.action == action).count()
    }

    /// Rows in delivery order.
    pub fn rows(&self) -> &[DiffRow] {
        &self.rows
    }

    /// Adds an inserted row.
    #[inline]
    pub fn add(&mut self, row_id: impl Into<RowId>, data: Document) {
        self.rows.push(DiffRow {
            action: DiffAction::Added,
            row_id: row_id.into(),
            data: Some(data),
        });
    }

    /// Adds a modified row.
    #[inline]
    pub fn change(&mut self, row_id: impl Into<RowId>, data: Document) {
        self.rows.push(DiffRow {
            action: DiffAction::Changed,
            row_id: row_id.into(),
            data: Some(data),
        });
    }

    /// Adds a removed row.
    #[inline]
    pub fn remove(&mut self, row_id: impl Into<RowId>) {
        self.rows.push(DiffRow {
            action: DiffAction::Removed,
            row_id: row_id.into(),
            data: None,
        });
    }
}

impl IntoIterator for ChangeSet {
    type Item = DiffRow;
    type IntoIter = std::vec::IntoIter<DiffRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
