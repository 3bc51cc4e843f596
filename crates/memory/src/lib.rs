//! livesql Memory - An in-process relational store for livesql.
//!
//! `MemoryDatabase` implements the backend traits the engine depends on:
//!
//! - `ConnectionProvider`: hands out `MemoryConnection`s, installs change
//!   notification per table and resolves view dependencies
//! - `Connection`: executes every `Statement`, including the snapshot diff,
//!   session attribution and transactions
//! - `ChangeChannel`: `MemoryChannel` delivers one payload per write
//!   statement, shaped like the PostgreSQL trigger's
//!
//! It also exposes knobs for exercising the engine under adverse timing:
//! diff latency, injected diff failures and a high-water mark of concurrent
//! diffs per query.
//!
//! # Example
//!
//! ```rust
//! use livesql_core::{doc, Connection, Filter, QueryDefinition, Statement};
//! use livesql_memory::MemoryDatabase;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> livesql_core::Result<()> {
//! let db = MemoryDatabase::new();
//! let people = db.create_table("people", "_id")?;
//! db.seed("people", vec![doc! { "_id" => "p1", "name" => "Anna" }])?;
//!
//! let mut conn = db.connect();
//! let rows = conn
//!     .execute(&Statement::Select(
//!         QueryDefinition::new(people).filter(Filter::eq("name", "Anna")),
//!     ))
//!     .await?;
//! assert_eq!(rows.row_count, 1);
//! # Ok(())
//! # }
//! ```

mod catalog;
pub mod channel;
pub mod connection;
mod diff;
mod eval;
pub mod store;

pub use channel::MemoryChannel;
pub use connection::MemoryConnection;
pub use store::TableStore;

use async_trait::async_trait;
use catalog::{Catalog, ViewDef};
use hashbrown::HashMap;
use livesql_core::{
    ChangePayload, Connection, ConnectionProvider, Document, Error, Filter, QueryId, Result,
    TableName, DEFAULT_SCHEMA,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered notifications per listener.
const CHANNEL_CAPACITY: usize = 4096;

pub(crate) struct Shared {
    pub(crate) catalog: Mutex<Catalog>,
    pub(crate) notify: broadcast::Sender<ChangePayload>,
    pub(crate) diff_latency: Mutex<Option<Duration>>,
    pub(crate) failures: AtomicUsize,
    pub(crate) running_diffs: Mutex<HashMap<QueryId, usize>>,
    pub(crate) max_concurrent_diffs: AtomicUsize,
}

/// A shared in-process database. Clones share the same data.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                catalog: Mutex::new(Catalog::default()),
                notify,
                diff_latency: Mutex::new(None),
                failures: AtomicUsize::new(0),
                running_diffs: Mutex::new(HashMap::new()),
                max_concurrent_diffs: AtomicUsize::new(0),
            }),
        }
    }

    fn name(name: &str) -> Result<TableName> {
        TableName::parse(name, DEFAULT_SCHEMA)
    }

    /// Creates an empty table identified by `id_column`.
    pub fn create_table(&self, name: &str, id_column: &str) -> Result<TableName> {
        let table = Self::name(name)?;
        let mut catalog = self.shared.catalog.lock();
        if catalog.exists(&table) {
            return Err(Error::definition(format!("relation {} already exists", table)));
        }
        catalog
            .tables
            .insert(table.clone(), TableStore::new(id_column));
        Ok(table)
    }

    /// Creates a view over the rows of `source` matching `filter`. `source`
    /// may itself be a view.
    pub fn create_view(&self, name: &str, source: &str, filter: Filter) -> Result<TableName> {
        let view = Self::name(name)?;
        let source = Self::name(source)?;
        let mut catalog = self.shared.catalog.lock();
        if catalog.exists(&view) {
            return Err(Error::definition(format!("relation {} already exists", view)));
        }
        if !catalog.exists(&source) {
            return Err(Error::relation_not_found(source.qualified()));
        }
        catalog.views.insert(view.clone(), ViewDef { source, filter });
        Ok(view)
    }

    /// Inserts rows without publishing notifications.
    pub fn seed(&self, name: &str, documents: Vec<Document>) -> Result<usize> {
        let table = Self::name(name)?;
        let mut catalog = self.shared.catalog.lock();
        let store = catalog.table_mut(&table)?;
        let count = documents.len();
        for document in documents {
            store.insert(document)?;
        }
        Ok(count)
    }

    /// Current rows of a table or view, in storage order.
    pub fn rows(&self, name: &str) -> Result<Vec<Document>> {
        let relation = Self::name(name)?;
        self.shared.catalog.lock().rows(&relation)
    }

    /// Number of snapshot rows kept for `query_id`.
    pub fn snapshot_len(&self, query_id: &QueryId) -> usize {
        self.shared
            .catalog
            .lock()
            .snapshots
            .get(query_id)
            .map_or(0, |s| s.len())
    }

    /// Number of queries with a snapshot.
    pub fn snapshot_count(&self) -> usize {
        self.shared.catalog.lock().snapshots.len()
    }

    /// Returns true if change notification is installed on `name`.
    pub fn has_trigger(&self, name: &str) -> bool {
        Self::name(name)
            .map(|table| self.shared.catalog.lock().triggers.contains(&table))
            .unwrap_or(false)
    }

    /// Opens a change channel.
    pub fn listen(&self) -> MemoryChannel {
        MemoryChannel::new(self.shared.notify.subscribe())
    }

    /// Opens a connection.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection::new(self.shared.clone())
    }

    /// Delays every diff by `latency`.
    pub fn set_diff_latency(&self, latency: Option<Duration>) {
        *self.shared.diff_latency.lock() = latency;
    }

    /// Makes the next `count` diffs fail with a database error.
    pub fn fail_next_diffs(&self, count: usize) {
        self.shared.failures.store(count, Ordering::Release);
    }

    /// Highest number of diffs of a single query that ever ran at once.
    pub fn max_concurrent_diffs(&self) -> usize {
        self.shared.max_concurrent_diffs.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ConnectionProvider for MemoryDatabase {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.connect()))
    }

    async fn prepare_relation(&self, relation: &TableName) -> Result<()> {
        let mut catalog = self.shared.catalog.lock();
        if !catalog.tables.contains_key(relation) {
            return Err(Error::relation_not_found(relation.qualified()));
        }
        if catalog.triggers.insert(relation.clone()) {
            debug!(table = %relation, "notify trigger installed");
        }
        Ok(())
    }

    async fn resolve_dependencies(&self, relation: &TableName) -> Result<Vec<TableName>> {
        self.shared.catalog.lock().base_tables(relation)
    }
}
