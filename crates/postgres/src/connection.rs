//! Pooled connections executing compiled statements.

use crate::decode;
use crate::driver_error;
use async_trait::async_trait;
use livesql_core::{Connection, Result, RowSet, Statement};
use livesql_query::{QueryCompiler, ResultShape};
use sqlx::pool::PoolConnection;
use sqlx::postgres::Postgres;
use tracing::{debug, trace};

/// A connection checked out of the provider's pool.
pub struct PgConnection {
    conn: PoolConnection<Postgres>,
    compiler: QueryCompiler,
    in_transaction: bool,
}

impl PgConnection {
    pub(crate) fn new(conn: PoolConnection<Postgres>, compiler: QueryCompiler) -> Self {
        Self {
            conn,
            compiler,
            in_transaction: false,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<RowSet> {
        let compiled = self.compiler.compile(statement)?;
        trace!(sql = %compiled.text, params = compiled.params.len(), "executing");
        let query = decode::bind_params(sqlx::query(&compiled.text), &compiled.params);

        let result = match compiled.shape {
            ResultShape::Documents | ResultShape::Diff => {
                let rows = query
                    .fetch_all(&mut *self.conn)
                    .await
                    .map_err(|e| driver_error("query failed", e))?;
                let decode_row = if compiled.shape == ResultShape::Diff {
                    decode::delta_row
                } else {
                    decode::document_row
                };
                let documents = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
                RowSet::from_rows(documents)
            }
            ResultShape::Count => {
                let row = query
                    .fetch_one(&mut *self.conn)
                    .await
                    .map_err(|e| driver_error("count failed", e))?;
                RowSet::from_rows(vec![decode::count_row(&row)?])
            }
            ResultShape::Affected => {
                let done = query
                    .execute(&mut *self.conn)
                    .await
                    .map_err(|e| driver_error("statement failed", e))?;
                RowSet::affected(done.rows_affected())
            }
            ResultShape::Ignore => {
                let outcome = query.execute(&mut *self.conn).await;
                // the server ends the transaction even when COMMIT fails
                match statement {
                    Statement::Begin { .. } => self.in_transaction = outcome.is_ok(),
                    Statement::Commit | Statement::Rollback => self.in_transaction = false,
                    _ => {}
                }
                outcome.map_err(|e| driver_error("statement failed", e))?;
                RowSet::default()
            }
        };
        Ok(result)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if self.in_transaction {
            // an open transaction must not go back to the pool
            debug!("closing connection with an open transaction");
            self.conn.close_on_drop();
        }
    }
}
