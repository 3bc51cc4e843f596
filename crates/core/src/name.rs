//! Canonical relation names.
//!
//! Every table or view reference is normalized to `schema.table` before it is
//! used as a key, so that `people` and `public.people` collide as intended.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema used when a reference carries none.
pub const DEFAULT_SCHEMA: &str = "public";

/// A fully-qualified relation name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Creates a name from its parts.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parses `table` or `schema.table`, filling in `default_schema` for the
    /// unqualified form.
    pub fn parse(name: &str, default_schema: &str) -> Result<Self> {
        let name = name.trim();
        let mut parts = name.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(table), None, None) if !table.is_empty() => {
                Ok(Self::new(default_schema, table))
            }
            (Some(schema), Some(table), None) if !schema.is_empty() && !table.is_empty() => {
                Ok(Self::new(schema, table))
            }
            _ => Err(Error::definition(format!("invalid relation name: {:?}", name))),
        }
    }

    /// Parses a name using [`DEFAULT_SCHEMA`].
    pub fn parse_default(name: &str) -> Result<Self> {
        Self::parse(name, DEFAULT_SCHEMA)
    }

    /// Returns the schema part.
    #[inline]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the table part.
    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns `schema.table`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
