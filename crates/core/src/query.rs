//! Query definitions.
//!
//! A `QueryDefinition` is the relation plus the filter, projection, ordering
//! and window of a read. Subscriptions own one and re-execute it on every
//! rerun, adjusting only the window as pages are loaded.

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::name::TableName;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column that identifies a row when the relation does not say otherwise.
pub const DEFAULT_ID_COLUMN: &str = "_id";

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One ORDER BY term.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Which columns a query returns.
///
/// The id column is always part of the output regardless of the projection,
/// since the diff keys every row by it.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    /// Builds a projection from a `column => flag` map where a truthy flag
    /// includes the column and a falsy one excludes it. Mixing both is a
    /// definition error, except that the id column may be excluded alongside
    /// inclusions (it is kept anyway).
    pub fn from_fields(fields: &BTreeMap<String, Value>, id_column: &str) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for (column, flag) in fields {
            let truthy = match flag {
                Value::Boolean(b) => *b,
                Value::Int64(i) => *i != 0,
                Value::Float64(f) => *f != 0.0,
                Value::Null => false,
                other => {
                    return Err(Error::definition(format!(
                        "field flag for {:?} must be boolean or numeric, got {}",
                        column, other
                    )))
                }
            };
            if truthy {
                include.push(column.clone());
            } else if column != id_column {
                exclude.push(column.clone());
            }
        }
        match (include.is_empty(), exclude.is_empty()) {
            (true, true) => Ok(Projection::All),
            (false, true) => Ok(Projection::Include(include)),
            (true, false) => Ok(Projection::Exclude(exclude)),
            (false, false) => Err(Error::definition(
                "fields cannot mix included and excluded columns",
            )),
        }
    }

    /// Returns true if `column` is part of the output.
    pub fn keeps(&self, column: &str, id_column: &str) -> bool {
        if column == id_column {
            return true;
        }
        match self {
            Projection::All => true,
            Projection::Include(cols) => cols.iter().any(|c| c == column),
            Projection::Exclude(cols) => !cols.iter().any(|c| c == column),
        }
    }
}

/// A complete read over one relation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub relation: TableName,
    pub id_column: String,
    pub filter: Filter,
    pub projection: Projection,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryDefinition {
    /// Selects every row of `relation`.
    pub fn new(relation: TableName) -> Self {
        Self {
            relation,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            filter: Filter::All,
            projection: Projection::All,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Narrows the filter to the single row with the given id.
    pub fn by_id(mut self, id: impl Into<Value>) -> Self {
        let by_id = Filter::by_id(&self.id_column, id);
        self.filter = std::mem::take(&mut self.filter).and(by_id);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Same query without limit or offset, as used for counting.
    pub fn unwindowed(&self) -> Self {
        Self {
            limit: None,
            offset: None,
            ..self.clone()
        }
    }

    /// Returns a copy with the given window applied.
    pub fn windowed(&self, limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            limit,
            offset,
            ..self.clone()
        }
    }

    /// Checks the definition for combinations no backend can execute.
    pub fn validate(&self) -> Result<()> {
        if self.id_column.is_empty() {
            return Err(Error::definition("id column must not be empty"));
        }
        if let Projection::Include(cols) | Projection::Exclude(cols) = &self.projection {
            if cols.iter().any(|c| c.is_empty()) {
                return Err(Error::definition("projected column names must not be empty"));
            }
        }
        if self.order_by.iter().any(|o| o.column.is_empty()) {
            return Err(Error::definition("order by column must not be empty"));
        }
        Ok(())
    }
}
