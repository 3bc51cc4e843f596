//! The diff statement.
//!
//! One statement runs the query, hashes every result row, reconciles the
//! hashes with the snapshot rows stored for the query id, and returns only
//! the delta. All four CTEs see the same snapshot, so the comparison and the
//! snapshot update are atomic.
//!
//! Output columns are `action` (`added`, `changed` or `removed`), `row_id` and
//! `data` (null for removed rows). Removed rows come first, followed by added
//! and changed rows in query order.

use crate::builder::{data_expr, order_clause, SqlBuilder};
use crate::ident::column;
use livesql_core::{QueryDefinition, QueryId, Value};

/// Renders the diff statement for `query` against `snapshot_table`.
pub fn diff_statement(
    snapshot_table: &str,
    query_id: &QueryId,
    query: &QueryDefinition,
) -> (String, Vec<Value>) {
    let mut b = SqlBuilder::new();
    let qid = b.bind(Value::String(query_id.to_string()));
    let data = data_expr(&query.projection, &query.id_column);
    let ord = match order_clause(&query.order_by) {
        Some(order) => format!("row_number() OVER (ORDER BY {})", order),
        None => "row_number() OVER ()".to_string(),
    };

    b.push("WITH current_rows AS (SELECT ")
        .push(&column(&query.id_column))
        .push("::text AS row_id, ")
        .push(&data)
        .push(" AS data, md5((")
        .push(&data)
        .push(")::text) AS hash, ")
        .push(&ord)
        .push(" AS ord")
        .from_where(query)
        .order_and_window(query)
        .push("), ");

    b.push(&format!(
        "changed AS (UPDATE {snap} AS r SET hash = c.hash FROM current_rows AS c \
         WHERE r.query_id = {qid} AND r.row_id = c.row_id AND r.hash <> c.hash \
         RETURNING r.row_id), \
         added AS (INSERT INTO {snap} (query_id, row_id, hash) \
         SELECT {qid}, c.row_id, c.hash FROM current_rows AS c \
         WHERE NOT EXISTS (SELECT 1 FROM {snap} AS r WHERE r.query_id = {qid} AND r.row_id = c.row_id) \
         ON CONFLICT (query_id, row_id) DO NOTHING RETURNING row_id), \
         removed AS (DELETE FROM {snap} AS r WHERE r.query_id = {qid} \
         AND NOT EXISTS (SELECT 1 FROM current_rows AS c WHERE c.row_id = r.row_id) \
         RETURNING r.row_id) ",
        snap = snapshot_table,
        qid = qid,
    ));

    b.push(
        "SELECT d.action, d.row_id, d.data FROM (\
         SELECT 'removed' AS action, x.row_id, NULL::jsonb AS data, NULL::bigint AS ord FROM removed AS x \
         UNION ALL \
         SELECT 'added', c.row_id, c.data, c.ord FROM added AS x JOIN current_rows AS c ON c.row_id = x.row_id \
         UNION ALL \
         SELECT 'changed', c.row_id, c.data, c.ord FROM changed AS x JOIN current_rows AS c ON c.row_id = x.row_id\
         ) AS d ORDER BY d.ord NULLS FIRST",
    );
    b.finish()
}
