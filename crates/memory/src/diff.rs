//! Snapshot diff.
//!
//! Reconciles a query result with the snapshot stored for its query id and
//! returns the delta in the same row shape the SQL diff statement produces:
//! `removed` rows first, then `added` and `changed` rows in query order.

use crate::eval;
use hashbrown::HashMap;
use livesql_core::statement::{ACTION_COLUMN, DATA_COLUMN, ROW_ID_COLUMN};
use livesql_core::{document_to_json, Document, QueryDefinition, RowSet, Value};
use sha2::{Digest, Sha256};

/// Snapshot of one query: row id to content hash.
pub(crate) type Snapshot = HashMap<String, String>;

fn content_hash(document: &Document) -> String {
    // object keys serialize sorted, so equal documents hash equally
    let body = document_to_json(document).to_string();
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn delta_row(action: &str, row_id: String, data: Option<&Document>) -> Document {
    let mut row = Document::new();
    row.insert(ACTION_COLUMN.to_string(), Value::from(action));
    row.insert(ROW_ID_COLUMN.to_string(), Value::String(row_id));
    row.insert(
        DATA_COLUMN.to_string(),
        data.map(|d| Value::Json(document_to_json(d)))
            .unwrap_or(Value::Null),
    );
    row
}

/// Runs `query` over `rows`, diffs it against `snapshot` and replaces the
/// snapshot with the new result.
pub(crate) fn diff<'a, I>(rows: I, query: &QueryDefinition, snapshot: &mut Snapshot) -> RowSet
where
    I: IntoIterator<Item = &'a Document>,
{
    let current: Vec<(String, Document)> = eval::evaluate(rows, query)
        .into_iter()
        .map(|row| {
            let id = row
                .get(&query.id_column)
                .map(Value::to_key_string)
                .unwrap_or_default();
            (id, row)
        })
        .collect();

    let mut next = Snapshot::with_capacity(current.len());
    let mut added_or_changed = Vec::new();
    for (id, row) in &current {
        let hash = content_hash(row);
        match snapshot.get(id) {
            None => added_or_changed.push(delta_row("added", id.clone(), Some(row))),
            Some(previous) if *previous != hash => {
                added_or_changed.push(delta_row("changed", id.clone(), Some(row)))
            }
            Some(_) => {}
        }
        // first occurrence wins, like ON CONFLICT DO NOTHING
        next.entry(id.clone()).or_insert(hash);
    }

    let mut removed: Vec<&String> = snapshot.keys().filter(|id| !next.contains_key(*id)).collect();
    removed.sort();
    let mut delta: Vec<Document> = removed
        .into_iter()
        .map(|id| delta_row("removed", id.clone(), None))
        .collect();
    delta.extend(added_or_changed);

    *snapshot = next;
    RowSet::from_rows(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesql_core::{doc, Filter, OrderBy, TableName};

    fn query() -> QueryDefinition {
        QueryDefinition::new(TableName::new("public", "people")).order_by(OrderBy::asc("name"))
    }

    fn actions(result: &RowSet) -> Vec<(String, String)> {
        result
            .rows
            .iter()
            .map(|r| (r[ACTION_COLUMN].to_key_string(), r[ROW_ID_COLUMN].to_key_string()))
            .collect()
    }

    #[test]
    fn test_first_diff_adds_everything_in_order() {
        let rows = vec![doc! { "_id" => "2", "name" => "b" }, doc! { "_id" => "1", "name" => "a" }];
        let mut snapshot = Snapshot::new();
        let result = diff(&rows, &query(), &mut snapshot);
        assert_eq!(
            actions(&result),
            vec![("added".into(), "1".into()), ("added".into(), "2".into())]
        );
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_second_diff_is_empty() {
        let rows = vec![doc! { "_id" => "1", "name" => "a" }];
        let mut snapshot = Snapshot::new();
        diff(&rows, &query(), &mut snapshot);
        assert_eq!(diff(&rows, &query(), &mut snapshot).row_count, 0);
    }

    #[test]
    fn test_removed_first_then_changed() {
        let mut snapshot = Snapshot::new();
        let before = vec![doc! { "_id" => "1", "name" => "a" }, doc! { "_id" => "2", "name" => "b" }];
        diff(&before, &query(), &mut snapshot);

        let after = vec![doc! { "_id" => "2", "name" => "b2" }, doc! { "_id" => "3", "name" => "c" }];
        let result = diff(&after, &query(), &mut snapshot);
        assert_eq!(
            actions(&result),
            vec![
                ("removed".into(), "1".into()),
                ("changed".into(), "2".into()),
                ("added".into(), "3".into()),
            ]
        );
        assert_eq!(result.rows[0][DATA_COLUMN], Value::Null);
    }

    #[test]
    fn test_rows_leaving_the_filter_are_removed() {
        let mut snapshot = Snapshot::new();
        let rows = vec![doc! { "_id" => "1", "name" => "a" }];
        diff(&rows, &query(), &mut snapshot);
        let narrowed = query().filter(Filter::eq("name", "z"));
        let result = diff(&rows, &narrowed, &mut snapshot);
        assert_eq!(actions(&result), vec![("removed".into(), "1".into())]);
        assert!(snapshot.is_empty());
    }
}
