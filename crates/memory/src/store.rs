//! Row storage and the undo journal.
//!
//! `TableStore` keeps the rows of one table in insertion order together with
//! a unique index on the id column. `Journal` records how to undo the writes
//! of an open transaction.

use hashbrown::HashMap;
use livesql_core::{Document, Error, Filter, Result, TableName, Value};
use std::collections::BTreeMap;

/// Insertion sequence number; the implicit row order of a table.
pub(crate) type Seq = u64;

/// Rows of a single table.
#[derive(Clone, Debug)]
pub struct TableStore {
    id_column: String,
    rows: BTreeMap<Seq, Document>,
    ids: HashMap<String, Seq>,
    next_seq: Seq,
}

impl TableStore {
    pub fn new(id_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            rows: BTreeMap::new(),
            ids: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = &Document> {
        self.rows.values()
    }

    fn key_of(&self, document: &Document) -> Option<String> {
        document
            .get(&self.id_column)
            .filter(|v| !v.is_null())
            .map(Value::to_key_string)
    }

    /// Inserts a row. A row without an id gets a generated one.
    pub(crate) fn insert(&mut self, mut document: Document) -> Result<Seq> {
        let key = match self.key_of(&document) {
            Some(key) => key,
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                document.insert(self.id_column.clone(), Value::String(id.clone()));
                id
            }
        };
        if self.ids.contains_key(&key) {
            return Err(Error::integrity(format!(
                "duplicate key {}={} violates unique constraint",
                self.id_column, key
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(key, seq);
        self.rows.insert(seq, document);
        Ok(seq)
    }

    /// Applies `changes` to every row matching `filter`. Returns the previous
    /// version of each updated row. Nothing is applied if any updated id
    /// would collide.
    pub(crate) fn update(&mut self, filter: &Filter, changes: &Document) -> Result<Vec<(Seq, Document)>> {
        let updated: Vec<(Seq, Document, Document)> = self
            .rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(seq, row)| {
                let mut next = row.clone();
                next.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                (*seq, row.clone(), next)
            })
            .collect();

        if changes.contains_key(&self.id_column) {
            let mut claimed: HashMap<String, Seq> = HashMap::new();
            for (seq, _, next) in &updated {
                let Some(key) = self.key_of(next) else {
                    return Err(Error::integrity(format!(
                        "null value in id column {}",
                        self.id_column
                    )));
                };
                let taken_by_other = self
                    .ids
                    .get(&key)
                    .is_some_and(|owner| !updated.iter().any(|(s, _, _)| s == owner));
                if taken_by_other || claimed.insert(key.clone(), *seq).is_some() {
                    return Err(Error::integrity(format!(
                        "duplicate key {}={} violates unique constraint",
                        self.id_column, key
                    )));
                }
            }
        }

        let mut previous = Vec::with_capacity(updated.len());
        for (seq, old, next) in updated {
            self.restore(seq, next);
            previous.push((seq, old));
        }
        Ok(previous)
    }

    /// Inserts each document, or updates the row whose `conflict_column`
    /// holds the same value. Returns the seq of every written row with its
    /// previous version, `None` for inserted rows. Nothing is applied if any
    /// document fails.
    pub(crate) fn upsert(
        &mut self,
        conflict_column: &str,
        documents: &[Document],
    ) -> Result<Vec<(Seq, Option<Document>)>> {
        let mut written: Vec<(Seq, Option<Document>)> = Vec::with_capacity(documents.len());
        for document in documents {
            let outcome = match document.get(conflict_column) {
                None | Some(Value::Null) => Err(Error::definition(format!(
                    "upsert document without conflict column {}",
                    conflict_column
                ))),
                Some(key) => {
                    let filter = Filter::eq(conflict_column, key.clone());
                    let existing = self.rows.iter().find(|(_, row)| filter.matches(row));
                    match existing.map(|(seq, _)| *seq) {
                        Some(seq) => self
                            .update_seq(seq, document)
                            .map(|old| written.push((seq, Some(old)))),
                        None => self
                            .insert(document.clone())
                            .map(|seq| written.push((seq, None))),
                    }
                }
            };
            if let Err(e) = outcome {
                for (seq, old) in written.into_iter().rev() {
                    match old {
                        Some(old) => self.restore(seq, old),
                        None => self.remove_seq(seq),
                    }
                }
                return Err(e);
            }
        }
        Ok(written)
    }

    /// Applies `changes` to the row at `seq` and returns its previous version.
    fn update_seq(&mut self, seq: Seq, changes: &Document) -> Result<Document> {
        let Some(old) = self.rows.get(&seq).cloned() else {
            return Err(Error::database(format!("row {} vanished", seq)));
        };
        let mut next = old.clone();
        next.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(key) = self.key_of(&next) {
            if self.ids.get(&key).is_some_and(|owner| *owner != seq) {
                return Err(Error::integrity(format!(
                    "duplicate key {}={} violates unique constraint",
                    self.id_column, key
                )));
            }
        }
        self.restore(seq, next);
        Ok(old)
    }

    /// Deletes every row matching `filter` and returns them.
    pub(crate) fn delete(&mut self, filter: &Filter) -> Vec<(Seq, Document)> {
        let seqs: Vec<Seq> = self
            .rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(seq, _)| *seq)
            .collect();
        seqs.into_iter()
            .filter_map(|seq| self.take(seq).map(|row| (seq, row)))
            .collect()
    }

    fn take(&mut self, seq: Seq) -> Option<Document> {
        let row = self.rows.remove(&seq)?;
        if let Some(key) = self.key_of(&row) {
            self.ids.remove(&key);
        }
        Some(row)
    }

    /// Puts `document` at `seq`, replacing whatever is there.
    pub(crate) fn restore(&mut self, seq: Seq, document: Document) {
        self.take(seq);
        if let Some(key) = self.key_of(&document) {
            self.ids.insert(key, seq);
        }
        self.rows.insert(seq, document);
    }

    pub(crate) fn remove_seq(&mut self, seq: Seq) {
        self.take(seq);
    }
}

/// One undo step.
#[derive(Clone, Debug)]
enum Undo {
    Inserted { table: TableName, seq: Seq },
    Replaced { table: TableName, seq: Seq, old: Document },
}

/// Undo log of an open transaction.
#[derive(Clone, Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<Undo>,
}

impl Journal {
    pub fn record_insert(&mut self, table: &TableName, seq: Seq) {
        self.entries.push(Undo::Inserted {
            table: table.clone(),
            seq,
        });
    }

    /// Records an updated or deleted row.
    pub fn record_replace(&mut self, table: &TableName, seq: Seq, old: Document) {
        self.entries.push(Undo::Replaced {
            table: table.clone(),
            seq,
            old,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reverts every recorded write, newest first.
    pub fn rollback(self, tables: &mut HashMap<TableName, TableStore>) {
        for entry in self.entries.into_iter().rev() {
            match entry {
                Undo::Inserted { table, seq } => {
                    if let Some(store) = tables.get_mut(&table) {
                        store.remove_seq(seq);
                    }
                }
                Undo::Replaced { table, seq, old } => {
                    if let Some(store) = tables.get_mut(&table) {
                        store.restore(seq, old);
                    }
                }
            }
        }
    }
}
