//! Conversions between driver values and the row model.

use livesql_core::statement::{ACTION_COLUMN, DATA_COLUMN, ROW_ID_COLUMN, TOTAL_ROW_COUNT_COLUMN};
use livesql_core::{document_from_json, Document, Error, Result, Value};
use sqlx::postgres::{PgArguments, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::Row;

/// Binds compiled parameters in order. NULL never reaches here; the compiler
/// renders it as a literal.
pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(Option::<String>::None),
            Value::Boolean(b) => query.bind(*b),
            Value::Int64(i) => query.bind(*i),
            Value::Float64(f) => query.bind(*f),
            Value::String(s) => query.bind(s.as_str()),
            Value::Json(j) => query.bind(Json(j)),
        };
    }
    query
}

pub(crate) fn document(data: serde_json::Value) -> Result<Document> {
    document_from_json(data)
}

pub(crate) fn count(total: i64) -> Document {
    let mut row = Document::new();
    row.insert(TOTAL_ROW_COUNT_COLUMN.to_string(), Value::Int64(total));
    row
}

/// Builds a delta row, rejecting actions the diff statement never produces.
pub(crate) fn delta(action: String, row_id: String, data: Option<serde_json::Value>) -> Result<Document> {
    match (action.as_str(), &data) {
        ("removed", _) | ("added", Some(_)) | ("changed", Some(_)) => {}
        ("added", None) | ("changed", None) => {
            return Err(Error::decode(format!("{} row {} without data", action, row_id)))
        }
        _ => return Err(Error::decode(format!("unknown diff action {:?}", action))),
    }
    let mut row = Document::new();
    row.insert(ACTION_COLUMN.to_string(), Value::String(action));
    row.insert(ROW_ID_COLUMN.to_string(), Value::String(row_id));
    row.insert(
        DATA_COLUMN.to_string(),
        data.map(Value::Json).unwrap_or(Value::Null),
    );
    Ok(row)
}

pub(crate) fn document_row(row: &PgRow) -> Result<Document> {
    document(row.try_get(DATA_COLUMN).map_err(column_error)?)
}

pub(crate) fn count_row(row: &PgRow) -> Result<Document> {
    Ok(count(row.try_get(TOTAL_ROW_COUNT_COLUMN).map_err(column_error)?))
}

pub(crate) fn delta_row(row: &PgRow) -> Result<Document> {
    delta(
        row.try_get(ACTION_COLUMN).map_err(column_error)?,
        row.try_get(ROW_ID_COLUMN).map_err(column_error)?,
        row.try_get(DATA_COLUMN).map_err(column_error)?,
    )
}

fn column_error(e: sqlx::Error) -> Error {
    Error::decode(e.to_string())
}
