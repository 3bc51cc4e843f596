//! Diff execution.
//!
//! `DiffExecutor` runs the single-statement snapshot diff for a subscription
//! and, for windowed loaders, the row count, both on one connection that is
//! returned to the pool when the call ends, including on error.

use crate::change_set::ChangeSet;
use livesql_core::{ConnectionProvider, Error, QueryDefinition, QueryId, Result, Statement};
use std::sync::Arc;
use tracing::{debug, error};

/// Result of one diff run.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    pub changes: ChangeSet,
    /// Row count of the unwindowed query, when requested.
    pub total_row_count: Option<u64>,
}

/// Executes diffs against a connection provider.
#[derive(Clone)]
pub struct DiffExecutor {
    provider: Arc<dyn ConnectionProvider>,
}

impl DiffExecutor {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Diffs `query` against the snapshot stored under `query_id`.
    ///
    /// Running it twice without a data change in between yields an empty
    /// change set the second time.
    pub async fn diff(
        &self,
        query_id: &QueryId,
        query: &QueryDefinition,
        count_rows: bool,
    ) -> Result<DiffOutcome> {
        query.validate()?;
        let mut conn = self.provider.acquire().await?;

        let rows = conn
            .execute(&Statement::Diff {
                query_id: query_id.clone(),
                query: query.clone(),
            })
            .await?;
        let changes = ChangeSet::from_row_set(rows).map_err(|e| {
            if matches!(e, Error::Integrity { .. }) {
                error!(query_id = %query_id, error = %e, "diff integrity violation");
            }
            e
        })?;

        let total_row_count = if count_rows {
            let counted = conn.execute(&Statement::Count(query.unwindowed())).await?;
            Some(counted.total_row_count().ok_or_else(|| {
                Error::decode(format!("count for query {} returned no total", query_id))
            })?)
        } else {
            None
        };

        debug!(
            query_id = %query_id,
            changes = changes.len(),
            total_row_count = ?total_row_count,
            "diff executed"
        );
        Ok(DiffOutcome {
            changes,
            total_row_count,
        })
    }

    /// Deletes every snapshot row of `query_id`.
    pub async fn drop_snapshot(&self, query_id: &QueryId) -> Result<u64> {
        let mut conn = self.provider.acquire().await?;
        let result = conn
            .execute(&Statement::DropSnapshot {
                query_id: query_id.clone(),
            })
            .await?;
        Ok(result.row_count)
    }
}
