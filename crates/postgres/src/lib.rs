//! livesql Postgres - The PostgreSQL backend for livesql.
//!
//! `PgProvider` implements the backend traits over a `sqlx` pool:
//!
//! - installs the engine's own schema (snapshot table and notify function)
//!   when it connects
//! - installs the statement-level notify trigger on each base table the
//!   engine prepares
//! - resolves view dependencies from the system catalog, through nested
//!   views
//! - hands out `PgConnection`s that execute compiled statements
//!
//! `PgProvider::listen` opens the `PgChangeChannel` the engine consumes.
//!
//! # Example
//!
//! ```rust,no_run
//! use livesql_postgres::{PgProvider, PostgresConfig};
//! use livesql_reactive::{Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! # async fn open() -> livesql_core::Result<()> {
//! let provider = Arc::new(PgProvider::connect(PostgresConfig::new("postgres://app@db/app")).await?);
//! let channel = provider.listen().await?;
//! let engine = Engine::start(EngineConfig::default(), provider, channel)?;
//! let _people = engine.table("people").await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
mod decode;

pub use channel::PgChangeChannel;
pub use config::PostgresConfig;
pub use connection::PgConnection;

use async_trait::async_trait;
use hashbrown::HashSet;
use livesql_core::{Connection, ConnectionProvider, Error, Result, TableName};
use livesql_query::ddl::{
    install_trigger_statements, setup_statements, RELATION_KIND_QUERY, VIEW_DEPENDENCIES_QUERY,
};
use livesql_query::QueryCompiler;
use parking_lot::Mutex;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPool, PgPoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Views nested deeper than this are rejected.
const MAX_VIEW_DEPTH: usize = 32;

/// Maps a driver error into the engine's error type.
pub(crate) fn driver_error(context: &str, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::RowNotFound | sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } => {
            Error::decode(format!("{}: {}", context, e))
        }
        other => Error::database_with(context, other),
    }
}

/// The PostgreSQL implementation of [`ConnectionProvider`].
pub struct PgProvider {
    pool: PgPool,
    config: PostgresConfig,
    compiler: QueryCompiler,
    triggers: Mutex<HashSet<TableName>>,
}

impl PgProvider {
    /// Connects a pool and installs the own schema.
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        config.validate()?;
        let options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| Error::definition(format!("invalid url: {}", e)))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| driver_error("connect failed", e))?;
        Self::with_pool(pool, config).await
    }

    /// Uses an existing pool. `config.url` is ignored.
    pub async fn with_pool(pool: PgPool, config: PostgresConfig) -> Result<Self> {
        config.validate()?;
        let provider = Self {
            pool,
            compiler: QueryCompiler::new(config.own_schema.as_str()),
            config,
            triggers: Mutex::new(HashSet::new()),
        };
        provider.install_schema().await?;
        Ok(provider)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Opens a channel listening on the notify channel.
    pub async fn listen(&self) -> Result<PgChangeChannel> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| driver_error("listen connect failed", e))?;
        listener
            .listen(&self.config.notify_channel)
            .await
            .map_err(|e| driver_error("listen failed", e))?;
        info!(channel = %self.config.notify_channel, "listening for changes");
        Ok(PgChangeChannel::new(listener, self.config.notify_channel.clone()))
    }

    async fn install_schema(&self) -> Result<()> {
        let statements = setup_statements(&self.config.own_schema, &self.config.notify_channel);
        self.run_in_transaction(&statements).await?;
        info!(schema = %self.config.own_schema, "own schema installed");
        Ok(())
    }

    async fn run_in_transaction(&self, statements: &[String]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| driver_error("begin failed", e))?;
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| driver_error("setup statement failed", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| driver_error("commit failed", e))
    }

    /// `Some(true)` for a view, `Some(false)` for a table, `None` if missing.
    async fn relation_kind(&self, relation: &TableName) -> Result<Option<bool>> {
        let row = sqlx::query(RELATION_KIND_QUERY)
            .bind(relation.schema())
            .bind(relation.table())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| driver_error("catalog lookup failed", e))?;
        row.map(|r| r.try_get::<bool, _>("is_view"))
            .transpose()
            .map_err(|e| driver_error("catalog lookup failed", e))
    }

    async fn direct_sources(&self, view: &TableName) -> Result<Vec<(TableName, bool)>> {
        let rows = sqlx::query(VIEW_DEPENDENCIES_QUERY)
            .bind(view.schema())
            .bind(view.table())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| driver_error("view dependency lookup failed", e))?;
        rows.iter()
            .map(|row| {
                let schema: String = row.try_get("table_schema")?;
                let table: String = row.try_get("table_name")?;
                let is_view: bool = row.try_get("is_view")?;
                Ok((TableName::new(schema, table), is_view))
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| driver_error("view dependency lookup failed", e))
    }
}

#[async_trait]
impl ConnectionProvider for PgProvider {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => Error::Timeout(self.config.acquire_timeout()),
            other => driver_error("acquire failed", other),
        })?;
        Ok(Box::new(PgConnection::new(conn, self.compiler.clone())))
    }

    async fn prepare_relation(&self, relation: &TableName) -> Result<()> {
        if self.triggers.lock().contains(relation) {
            return Ok(());
        }
        match self.relation_kind(relation).await? {
            None => return Err(Error::relation_not_found(relation.qualified())),
            Some(true) => {
                return Err(Error::definition(format!(
                    "{} is a view; triggers go on its base tables",
                    relation
                )))
            }
            Some(false) => {}
        }
        let statements = install_trigger_statements(&self.config.own_schema, relation);
        self.run_in_transaction(&statements).await?;
        self.triggers.lock().insert(relation.clone());
        debug!(table = %relation, "notify trigger installed");
        Ok(())
    }

    async fn resolve_dependencies(&self, relation: &TableName) -> Result<Vec<TableName>> {
        match self.relation_kind(relation).await? {
            None => return Err(Error::relation_not_found(relation.qualified())),
            Some(false) => return Ok(vec![relation.clone()]),
            Some(true) => {}
        }
        let mut tables = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![(relation.clone(), 0usize)];
        seen.insert(relation.clone());
        while let Some((view, depth)) = pending.pop() {
            if depth >= MAX_VIEW_DEPTH {
                return Err(Error::definition(format!(
                    "views nested deeper than {} under {}",
                    MAX_VIEW_DEPTH, relation
                )));
            }
            for (source, is_view) in self.direct_sources(&view).await? {
                if !seen.insert(source.clone()) {
                    continue;
                }
                if is_view {
                    pending.push((source, depth + 1));
                } else {
                    tables.push(source);
                }
            }
        }
        tables.sort();
        debug!(view = %relation, tables = tables.len(), "view dependencies resolved");
        Ok(tables)
    }
}
