//! Filter predicates.
//!
//! A `Filter` is the structured WHERE clause of a query definition. The query
//! compiler renders it to SQL; embedded stores evaluate it directly with
//! [`Filter::matches`], which follows SQL three-valued logic closely enough
//! that NULL comparisons never match.

use crate::pattern_match::{like, prefix_pattern};
use crate::row::Document;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Returns the SQL operator token.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A structured filter predicate.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum Filter {
    /// Matches every row.
    #[default]
    All,
    /// `column <op> value`
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// `column LIKE pattern`
    Like { column: String, pattern: String },
    /// `column IN (values)`
    In { column: String, values: Vec<Value> },
    /// `column IS NULL`
    IsNull(String),
    /// `column IS NOT NULL`
    IsNotNull(String),
    /// Conjunction. Empty matches everything.
    And(Vec<Filter>),
    /// Disjunction. Empty matches nothing.
    Or(Vec<Filter>),
    /// Negation.
    Not(Box<Filter>),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column <> value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// `column <op> value`
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column LIKE pattern`
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// Rows whose text column starts with `prefix`, matched literally.
    pub fn starts_with(column: impl Into<String>, prefix: &str) -> Self {
        Filter::like(column, prefix_pattern(prefix))
    }

    /// `column IN (values)`
    pub fn in_list<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Selector shorthand: a bare id selects the row whose id column equals it.
    pub fn by_id(id_column: &str, id: impl Into<Value>) -> Self {
        Filter::eq(id_column, id)
    }

    /// Combines with another filter using AND, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Returns true if the filter accepts every row.
    pub fn is_all(&self) -> bool {
        match self {
            Filter::All => true,
            Filter::And(parts) => parts.iter().all(Filter::is_all),
            _ => false,
        }
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        self.eval(document).unwrap_or(false)
    }

    /// Three-valued evaluation: `None` stands for SQL UNKNOWN.
    fn eval(&self, document: &Document) -> Option<bool> {
        let cell = |column: &str| document.get(column).filter(|v| !v.is_null());
        match self {
            Filter::All => Some(true),
            // `= NULL` and `<> NULL` read as IS NULL / IS NOT NULL
            Filter::Compare { column, op, value } if value.is_null() => match op {
                CompareOp::Eq => Some(cell(column).is_none()),
                CompareOp::Ne => Some(cell(column).is_some()),
                _ => None,
            },
            Filter::Compare { column, op, value } => {
                let left = cell(column)?;
                let ord = left.cmp(value);
                Some(match op {
                    CompareOp::Eq => left == value || ord.is_eq(),
                    CompareOp::Ne => !(left == value || ord.is_eq()),
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Le => ord.is_le(),
                    CompareOp::Gt => ord.is_gt(),
                    CompareOp::Ge => ord.is_ge(),
                })
            }
            Filter::Like { column, pattern } => {
                let left = cell(column)?;
                Some(like(&left.to_key_string(), pattern))
            }
            Filter::In { column, values } => {
                let left = cell(column)?;
                Some(values.iter().any(|v| left.cmp(v).is_eq()))
            }
            Filter::IsNull(column) => Some(cell(column).is_none()),
            Filter::IsNotNull(column) => Some(cell(column).is_some()),
            Filter::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(document) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Filter::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.eval(document) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Filter::Not(inner) => inner.eval(document).map(|b| !b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn person() -> Document {
        doc! { "_id" => "p1", "first_name" => "Anna", "age" => 31, "email" => Value::Null }
    }

    #[test]
    fn test_compare() {
        assert!(Filter::eq("first_name", "Anna").matches(&person()));
        assert!(Filter::gt("age", 30).matches(&person()));
        assert!(!Filter::lt("age", 30).matches(&person()));
        assert!(Filter::ne("age", 30).matches(&person()));
    }

    #[test]
    fn test_starts_with() {
        assert!(Filter::starts_with("first_name", "A").matches(&person()));
        assert!(!Filter::starts_with("first_name", "B").matches(&person()));
    }

    #[test]
    fn test_null_never_compares() {
        assert!(!Filter::eq("email", "x").matches(&person()));
        assert!(!Filter::ne("email", "x").matches(&person()));
        assert!(!Filter::Not(Box::new(Filter::eq("email", "x"))).matches(&person()));
        assert!(Filter::IsNull("email".into()).matches(&person()));
        assert!(Filter::IsNull("missing".into()).matches(&person()));
        assert!(Filter::eq("email", Value::Null).matches(&person()));
        assert!(Filter::ne("age", Value::Null).matches(&person()));
    }

    #[test]
    fn test_in_list() {
        assert!(Filter::in_list("age", [30, 31]).matches(&person()));
        assert!(!Filter::in_list("age", [1, 2]).matches(&person()));
    }

    #[test]
    fn test_and_or() {
        let f = Filter::eq("first_name", "Anna").and(Filter::gt("age", 40));
        assert!(!f.matches(&person()));
        let f = Filter::Or(vec![Filter::eq("first_name", "Bob"), Filter::gt("age", 30)]);
        assert!(f.matches(&person()));
        assert!(!Filter::Or(vec![]).matches(&person()));
        assert!(Filter::And(vec![]).matches(&person()));
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::All.and(Filter::eq("a", 1)).and(Filter::eq("b", 2));
        assert_eq!(f, Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]));
        assert!(Filter::All.is_all());
        assert!(!f.is_all());
    }
}
