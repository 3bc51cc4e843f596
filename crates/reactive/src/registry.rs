//! Dependency registry.
//!
//! This module provides `DependencyRegistry` which tracks which subscriptions
//! read from which base tables, so a change notification for a table can be
//! routed to exactly the subscriptions it affects.

use hashbrown::HashMap;
use livesql_core::{QueryId, TableName, WriterId};
use parking_lot::RwLock;

/// One subscription registered under a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub query_id: QueryId,
    pub writer_id: Option<WriterId>,
}

/// A registry that maps tables to the subscriptions depending on them.
///
/// Table names must already be canonical `schema.table` names. Every
/// mutation takes the registry-wide write lock once, so a lookup never sees
/// a subscription registered under only some of its tables.
///
/// # Example
///
/// ```
/// use livesql_core::{QueryId, TableName, WriterId};
/// use livesql_reactive::DependencyRegistry;
///
/// let registry = DependencyRegistry::new();
/// let people = TableName::new("public", "people");
///
/// registry.register(&QueryId::from("q1"), Some(&WriterId::from("c1")), &[people.clone()]);
///
/// let affected = registry.lookup(&people);
/// assert_eq!(affected.len(), 1);
/// assert_eq!(affected[0].query_id, QueryId::from("q1"));
/// ```
#[derive(Default)]
pub struct DependencyRegistry {
    /// Table -> query -> owning writer
    tables: RwLock<HashMap<TableName, HashMap<QueryId, Option<WriterId>>>>,
}

impl DependencyRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a query under each of `tables`.
    pub fn register(&self, query_id: &QueryId, writer_id: Option<&WriterId>, tables: &[TableName]) {
        let mut map = self.tables.write();
        for table in tables {
            map.entry(table.clone())
                .or_default()
                .insert(query_id.clone(), writer_id.cloned());
        }
    }

    /// Removes the query from each of `tables`.
    ///
    /// Returns the number of entries removed.
    pub fn unregister(&self, query_id: &QueryId, tables: &[TableName]) -> usize {
        let mut map = self.tables.write();
        let mut removed = 0;
        for table in tables {
            if let Some(queries) = map.get_mut(table) {
                if queries.remove(query_id).is_some() {
                    removed += 1;
                }
                if queries.is_empty() {
                    map.remove(table);
                }
            }
        }
        removed
    }

    /// Returns the subscriptions depending on `table`.
    pub fn lookup(&self, table: &TableName) -> Vec<Registration> {
        self.tables
            .read()
            .get(table)
            .map(|queries| {
                queries
                    .iter()
                    .map(|(query_id, writer_id)| Registration {
                        query_id: query_id.clone(),
                        writer_id: writer_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true if the query is registered under any table.
    pub fn contains(&self, query_id: &QueryId) -> bool {
        self.tables
            .read()
            .values()
            .any(|queries| queries.contains_key(query_id))
    }

    /// Returns the number of queries depending on a specific table.
    pub fn queries_for_table(&self, table: &TableName) -> usize {
        self.tables.read().get(table).map(|q| q.len()).unwrap_or(0)
    }

    /// Returns the number of tables with at least one query.
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true if no query is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Clears all registrations.
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}
