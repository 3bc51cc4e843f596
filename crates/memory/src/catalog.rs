//! Relations of the in-process store.

use crate::diff::Snapshot;
use crate::store::TableStore;
use hashbrown::{HashMap, HashSet};
use livesql_core::{Document, Error, Filter, QueryId, Result, TableName};

/// Views may be stacked at most this deep.
const MAX_VIEW_DEPTH: usize = 32;

/// A view: the rows of `source` matching `filter`.
#[derive(Clone, Debug)]
pub(crate) struct ViewDef {
    pub source: TableName,
    pub filter: Filter,
}

/// Everything the store holds, guarded by one lock.
#[derive(Default)]
pub(crate) struct Catalog {
    pub tables: HashMap<TableName, TableStore>,
    pub views: HashMap<TableName, ViewDef>,
    pub snapshots: HashMap<QueryId, Snapshot>,
    /// Tables with change notification installed.
    pub triggers: HashSet<TableName>,
}

impl Catalog {
    pub fn exists(&self, relation: &TableName) -> bool {
        self.tables.contains_key(relation) || self.views.contains_key(relation)
    }

    pub fn table_mut(&mut self, relation: &TableName) -> Result<&mut TableStore> {
        if self.views.contains_key(relation) {
            return Err(Error::definition(format!(
                "cannot write to view {}",
                relation
            )));
        }
        self.tables
            .get_mut(relation)
            .ok_or_else(|| Error::relation_not_found(relation.qualified()))
    }

    /// Materializes the rows of a table or view.
    pub fn rows(&self, relation: &TableName) -> Result<Vec<Document>> {
        self.rows_at(relation, 0)
    }

    fn rows_at(&self, relation: &TableName, depth: usize) -> Result<Vec<Document>> {
        if let Some(table) = self.tables.get(relation) {
            return Ok(table.rows().cloned().collect());
        }
        let view = self
            .views
            .get(relation)
            .ok_or_else(|| Error::relation_not_found(relation.qualified()))?;
        if depth >= MAX_VIEW_DEPTH {
            return Err(Error::definition(format!("view {} nests too deep", relation)));
        }
        Ok(self
            .rows_at(&view.source, depth + 1)?
            .into_iter()
            .filter(|row| view.filter.matches(row))
            .collect())
    }

    /// Base tables `relation` reads from, transitively, without duplicates.
    pub fn base_tables(&self, relation: &TableName) -> Result<Vec<TableName>> {
        let mut found = Vec::new();
        self.collect_base_tables(relation, 0, &mut found)?;
        Ok(found)
    }

    fn collect_base_tables(
        &self,
        relation: &TableName,
        depth: usize,
        found: &mut Vec<TableName>,
    ) -> Result<()> {
        if self.tables.contains_key(relation) {
            if !found.contains(relation) {
                found.push(relation.clone());
            }
            return Ok(());
        }
        let view = self
            .views
            .get(relation)
            .ok_or_else(|| Error::relation_not_found(relation.qualified()))?;
        if depth >= MAX_VIEW_DEPTH {
            return Err(Error::definition(format!("view {} nests too deep", relation)));
        }
        self.collect_base_tables(&view.source, depth + 1, found)
    }
}
