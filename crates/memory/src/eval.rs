//! Query evaluation over materialized rows.

use livesql_core::{Document, OrderBy, Projection, QueryDefinition, SortOrder, Value};
use std::cmp::Ordering;

/// Compares two cells for `ORDER BY`: nulls sort last ascending and first
/// descending.
fn compare_cells(a: Option<&Value>, b: Option<&Value>, order: SortOrder) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let ordering = match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    };
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn compare_rows(a: &Document, b: &Document, order_by: &[OrderBy]) -> Ordering {
    order_by
        .iter()
        .map(|o| compare_cells(a.get(&o.column), b.get(&o.column), o.order))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Applies the projection. The id column always survives.
pub(crate) fn project(row: &Document, projection: &Projection, id_column: &str) -> Document {
    match projection {
        Projection::All => row.clone(),
        _ => row
            .iter()
            .filter(|(column, _)| projection.keeps(column, id_column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect(),
    }
}

/// Filters and orders `rows`, without window or projection.
pub(crate) fn matching<'a, I>(rows: I, query: &QueryDefinition) -> Vec<&'a Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut matched: Vec<&Document> = rows
        .into_iter()
        .filter(|row| query.filter.matches(row))
        .collect();
    if !query.order_by.is_empty() {
        // stable: ties keep insertion order
        matched.sort_by(|a, b| compare_rows(a, b, &query.order_by));
    }
    matched
}

/// Evaluates the whole query: filter, order, window, projection.
pub(crate) fn evaluate<'a, I>(rows: I, query: &QueryDefinition) -> Vec<Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    matching(rows, query)
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| project(row, &query.projection, &query.id_column))
        .collect()
}
