//! Relation handles.
//!
//! `Table` and `View` are cheap handles bound to one relation. Both build
//! subscriptions and one-shot selects through [`Find`]; only tables write.

use crate::engine::EngineShared;
use crate::loader::LoadingKind;
use crate::reactivity::ReactivityMode;
use crate::subscription::{Subscription, SubscriptionOptions};
use livesql_core::{
    Document, Error, Filter, OrderBy, Projection, QueryDefinition, Result, SessionContext,
    Statement, StatementId, TableName, Value, WriterId, DEFAULT_ID_COLUMN,
};
use std::sync::Arc;
use tracing::debug;

/// Options of a write through a table handle.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Attributed to the change notification; subscriptions of the same
    /// writer treat the write as their own.
    pub writer_id: Option<WriterId>,
    /// Wait until every own-writer subscription has observed the write.
    pub wait: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            writer_id: None,
            wait: true,
        }
    }
}

impl WriteOptions {
    pub fn writer(writer_id: impl Into<WriterId>) -> Self {
        Self {
            writer_id: Some(writer_id.into()),
            ..Self::default()
        }
    }

    /// Returns as soon as the statement finished.
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// Result of a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    pub row_count: u64,
    /// True once own-writer subscriptions observed the write. Writes that
    /// changed nothing count as observed; writes that did not wait, or whose
    /// wait timed out, do not.
    pub observed: bool,
}

#[derive(Clone)]
struct Relation {
    shared: Arc<EngineShared>,
    name: TableName,
    dependencies: Vec<TableName>,
    id_column: String,
}

impl Relation {
    fn find(&self, filter: Filter) -> Find {
        Find {
            relation: self.clone(),
            query: QueryDefinition::new(self.name.clone())
                .with_id_column(self.id_column.clone())
                .filter(filter),
            fields: None,
            options: SubscriptionOptions::default(),
        }
    }
}

macro_rules! relation_handle {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new(
                shared: Arc<EngineShared>,
                name: TableName,
                dependencies: Vec<TableName>,
            ) -> Self {
                Self {
                    relation: Relation {
                        shared,
                        name,
                        dependencies,
                        id_column: DEFAULT_ID_COLUMN.to_string(),
                    },
                }
            }

            pub fn name(&self) -> &TableName {
                &self.relation.name
            }

            /// Base tables this relation reads.
            pub fn dependencies(&self) -> &[TableName] {
                &self.relation.dependencies
            }

            pub fn id_column(&self) -> &str {
                &self.relation.id_column
            }

            /// Uses `column` as row identity instead of `_id`.
            pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
                self.relation.id_column = column.into();
                self
            }

            /// Starts a query over the rows matching `filter`.
            pub fn find(&self, filter: Filter) -> Find {
                self.relation.find(filter)
            }

            /// Starts a query over the single row with id `id`.
            pub fn find_by_id(&self, id: impl Into<Value>) -> Find {
                let id = Filter::by_id(&self.relation.id_column, id);
                self.relation.find(id)
            }

            /// Reads the rows matching `filter` once.
            pub async fn select(&self, filter: Filter) -> Result<Vec<Document>> {
                self.find(filter).fetch().await
            }
        }
    };
}

/// Handle to a base table.
#[derive(Clone)]
pub struct Table {
    relation: Relation,
}

/// Handle to a view. Read-only.
#[derive(Clone)]
pub struct View {
    relation: Relation,
}

relation_handle!(Table);
relation_handle!(View);

impl Table {
    /// Inserts `documents`.
    pub async fn insert(
        &self,
        documents: Vec<Document>,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        let statement = Statement::Insert {
            relation: self.relation.name.clone(),
            documents,
        };
        self.write(statement, options).await
    }

    pub async fn insert_one(&self, document: Document, options: &WriteOptions) -> Result<WriteOutcome> {
        self.insert(vec![document], options).await
    }

    /// Applies `changes` to every row matching `filter`.
    pub async fn update(
        &self,
        filter: Filter,
        changes: Document,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        let statement = Statement::Update {
            relation: self.relation.name.clone(),
            filter,
            changes,
        };
        self.write(statement, options).await
    }

    /// Inserts `documents`, updating instead the rows whose
    /// `conflict_column` value already exists.
    pub async fn upsert(
        &self,
        conflict_column: impl Into<String>,
        documents: Vec<Document>,
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        let statement = Statement::Upsert {
            relation: self.relation.name.clone(),
            conflict_column: conflict_column.into(),
            documents,
        };
        self.write(statement, options).await
    }

    /// Deletes every row matching `filter`.
    pub async fn remove(&self, filter: Filter, options: &WriteOptions) -> Result<WriteOutcome> {
        let statement = Statement::Delete {
            relation: self.relation.name.clone(),
            filter,
        };
        self.write(statement, options).await
    }

    pub(crate) fn table_name(&self) -> &TableName {
        &self.relation.name
    }

    /// Runs a write and, if it changed rows, waits for the router to finish
    /// the own-writer reactions to it.
    async fn write(&self, statement: Statement, options: &WriteOptions) -> Result<WriteOutcome> {
        let shared = &self.relation.shared;
        if shared.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let statement_id = StatementId::generate();
        // registered before executing: the notification may beat our return
        let ticket = options.wait.then(|| shared.gate.begin(statement_id.clone()));

        let row_count = match self.execute_write(&statement, &statement_id, options).await {
            Ok(row_count) => row_count,
            Err(e) => {
                if let Some(ticket) = ticket {
                    shared.gate.abandon(ticket.statement_id());
                }
                return Err(e);
            }
        };

        let observed = match ticket {
            Some(ticket) if row_count > 0 => {
                ticket
                    .wait(&shared.gate, shared.config.write_gate_timeout())
                    .await
            }
            Some(ticket) => {
                // no rows changed, no notification follows
                shared.gate.abandon(ticket.statement_id());
                true
            }
            None => false,
        };
        debug!(
            table = %self.relation.name,
            statement_id = %statement_id,
            row_count,
            observed,
            "write finished"
        );
        Ok(WriteOutcome {
            row_count,
            observed,
        })
    }

    /// Executes on a pooled connection, which is released before returning.
    async fn execute_write(
        &self,
        statement: &Statement,
        statement_id: &StatementId,
        options: &WriteOptions,
    ) -> Result<u64> {
        let mut conn = self.relation.shared.provider.acquire().await?;
        conn.execute(&Statement::SetSessionContext(SessionContext {
            writer_id: options.writer_id.clone(),
            statement_id: Some(statement_id.clone()),
            statement_target: Some(self.relation.name.clone()),
            local: false,
        }))
        .await?;
        let executed = conn.execute(statement).await;
        // pooled connections must not carry the attribution to the next user
        let reset = conn.execute(&Statement::ResetSessionContext).await;
        let rows = executed?;
        reset?;
        Ok(rows.row_count)
    }
}

/// A query under construction. Finish it with [`Find::subscribe`] or
/// [`Find::fetch`].
#[must_use = "a query does nothing until subscribed or fetched"]
pub struct Find {
    relation: Relation,
    query: QueryDefinition,
    fields: Option<Document>,
    options: SubscriptionOptions,
}

impl Find {
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.query = self.query.order_by(order);
        self
    }

    /// Limits a complete-loading query. Incremental and paging loaders own
    /// the window and reject this.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    /// Field selection as a `{column: flag}` document: truthy flags include,
    /// falsy ones exclude. Mixing both is a definition error.
    pub fn fields(mut self, fields: Document) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.fields = None;
        self.query = self.query.project(projection);
        self
    }

    pub fn writer(mut self, writer_id: impl Into<WriterId>) -> Self {
        self.options.writer_id = Some(writer_id.into());
        self
    }

    pub fn reactivity(mut self, reactivity: ReactivityMode) -> Self {
        self.options.reactivity = reactivity;
        self
    }

    pub fn loading(mut self, kind: LoadingKind) -> Self {
        self.options.loading = kind;
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.options.page_size = Some(page_size);
        self
    }

    pub fn salt(mut self, name: impl Into<String>) -> Self {
        self.options.salt = Some(name.into());
        self
    }

    fn definition(&self) -> Result<QueryDefinition> {
        let mut query = self.query.clone();
        if let Some(fields) = &self.fields {
            query.projection = Projection::from_fields(fields, &query.id_column)?;
        }
        query.validate()?;
        Ok(query)
    }

    /// Creates a subscription in the `created` state. Call
    /// [`Subscription::run`] to load it.
    pub fn subscribe(self) -> Result<Subscription> {
        let query = self.definition()?;
        let Relation {
            shared,
            name,
            dependencies,
            ..
        } = self.relation;
        if shared.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let subscription = Subscription::new(&shared, name, dependencies, query, self.options)?;
        shared.attach(&subscription);
        debug!(
            query_id = %subscription.id(),
            relation = %subscription.relation(),
            reactivity = ?subscription.reactivity(),
            "subscription created"
        );
        Ok(subscription)
    }

    /// Runs the query once without subscribing.
    pub async fn fetch(self) -> Result<Vec<Document>> {
        let query = self.definition()?;
        let mut conn = self.relation.shared.provider.acquire().await?;
        let rows = conn.execute(&Statement::Select(query)).await?;
        Ok(rows.rows)
    }
}
