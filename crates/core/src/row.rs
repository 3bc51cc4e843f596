//! Row and document structures for livesql.
//!
//! A `Document` is a set of named column values as it travels between the
//! engine and a relation. A `Row` pairs a document with the identity the
//! snapshot table keys it by.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a row inside one query's snapshot (the id column as text).
pub type RowId = String;

/// Named column values of a single row.
pub type Document = BTreeMap<String, Value>;

/// Builds a `Document` from `column => value` pairs.
///
/// ```
/// use livesql_core::{doc, Value};
///
/// let d = doc! { "_id" => "p1", "age" => 31 };
/// assert_eq!(d.get("age"), Some(&Value::Int64(31)));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::Document::new();
        $( d.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        d
    }};
}

/// Converts a JSON object into a `Document`.
pub fn document_from_json(json: serde_json::Value) -> Result<Document> {
    match json {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(column, value)| (column, Value::from(value)))
            .collect()),
        other => Err(Error::decode(format!("expected a JSON object, got {}", other))),
    }
}

/// Converts a `Document` into a JSON object.
pub fn document_to_json(document: &Document) -> serde_json::Value {
    serde_json::Value::Object(
        document
            .iter()
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect(),
    )
}

/// A row of a query result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Identity of this row within its relation.
    id: RowId,
    /// Projected column values.
    data: Document,
}

impl Row {
    /// Creates a new row with the given ID and data.
    pub fn new(id: impl Into<RowId>, data: Document) -> Self {
        Self { id: id.into(), data }
    }

    /// Returns the row ID.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the column values.
    #[inline]
    pub fn data(&self) -> &Document {
        &self.data
    }

    /// Returns a mutable reference to the column values.
    #[inline]
    pub fn data_mut(&mut self) -> &mut Document {
        &mut self.data
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// Consumes the row and returns its parts.
    pub fn into_parts(self) -> (RowId, Document) {
        (self.id, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_macro() {
        let d = doc! { "_id" => "a", "n" => 1 };
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("_id"), Some(&Value::String("a".into())));
    }

    #[test]
    fn test_document_json_roundtrip_shape() {
        let d = document_from_json(json!({"_id": "a", "tags": ["x"]})).unwrap();
        assert_eq!(d.get("tags"), Some(&Value::Json(json!(["x"]))));
        assert_eq!(document_to_json(&d), json!({"_id": "a", "tags": ["x"]}));
    }

    #[test]
    fn test_document_from_non_object() {
        assert!(document_from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::new("p1", doc! { "_id" => "p1", "first_name" => "Ann" });
        assert_eq!(row.id(), "p1");
        assert_eq!(row.get("first_name"), Some(&Value::String("Ann".into())));
        assert_eq!(row.get("missing"), None);
    }
}
