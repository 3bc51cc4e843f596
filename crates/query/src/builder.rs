//! Incremental SQL text builder with positional parameters.
//!
//! Values are bound as `$n` placeholders in the order they are pushed. NULL is
//! always written as a literal so the server never has to infer the type of
//! an untyped null parameter.

use crate::ident::{column, quote_literal, quote_table};
use livesql_core::{CompareOp, Filter, OrderBy, Projection, QueryDefinition, Value};

#[derive(Debug, Default)]
pub(crate) struct SqlBuilder {
    text: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    /// Binds `value` and returns its placeholder (or `NULL`).
    pub fn bind(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value);
        format!("${}", self.params.len())
    }

    /// Binds `value` and appends its placeholder.
    pub fn push_bind(&mut self, value: Value) -> &mut Self {
        let placeholder = self.bind(value);
        self.push(&placeholder)
    }

    pub fn finish(self) -> (String, Vec<Value>) {
        (self.text, self.params)
    }

    /// Renders a filter predicate over the alias `q`.
    pub fn filter(&mut self, filter: &Filter) -> String {
        match filter {
            Filter::All => "TRUE".to_string(),
            Filter::Compare { column: col, op, value } if value.is_null() => match op {
                CompareOp::Eq => format!("{} IS NULL", column(col)),
                CompareOp::Ne => format!("{} IS NOT NULL", column(col)),
                _ => "NULL".to_string(),
            },
            Filter::Compare { column: col, op, value } => {
                let placeholder = self.bind(value.clone());
                format!("{} {} {}", column(col), op.as_sql(), placeholder)
            }
            Filter::Like { column: col, pattern } => {
                let placeholder = self.bind(Value::String(pattern.clone()));
                format!("{}::text LIKE {}", column(col), placeholder)
            }
            Filter::In { values, .. } if values.is_empty() => "FALSE".to_string(),
            Filter::In { column: col, values } => {
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.bind(v.clone())).collect();
                format!("{} IN ({})", column(col), placeholders.join(", "))
            }
            Filter::IsNull(col) => format!("{} IS NULL", column(col)),
            Filter::IsNotNull(col) => format!("{} IS NOT NULL", column(col)),
            Filter::And(parts) if parts.is_empty() => "TRUE".to_string(),
            Filter::Or(parts) if parts.is_empty() => "FALSE".to_string(),
            Filter::And(parts) => self.junction(parts, " AND "),
            Filter::Or(parts) => self.junction(parts, " OR "),
            Filter::Not(inner) => format!("NOT ({})", self.filter(inner)),
        }
    }

    fn junction(&mut self, parts: &[Filter], separator: &str) -> String {
        let rendered: Vec<String> = parts
            .iter()
            .map(|part| format!("({})", self.filter(part)))
            .collect();
        rendered.join(separator)
    }

    /// Appends `FROM <relation> AS q WHERE <filter>`.
    pub fn from_where(&mut self, query: &QueryDefinition) -> &mut Self {
        let predicate = self.filter(&query.filter);
        self.push(" FROM ")
            .push(&quote_table(&query.relation))
            .push(" AS q");
        if !query.filter.is_all() {
            self.push(" WHERE ").push(&predicate);
        }
        self
    }

    /// Appends ORDER BY, LIMIT and OFFSET.
    pub fn order_and_window(&mut self, query: &QueryDefinition) -> &mut Self {
        if let Some(order) = order_clause(&query.order_by) {
            self.push(" ORDER BY ").push(&order);
        }
        if let Some(limit) = query.limit {
            self.push(" LIMIT ").push_bind(Value::Int64(limit as i64));
        }
        if let Some(offset) = query.offset {
            self.push(" OFFSET ").push_bind(Value::Int64(offset as i64));
        }
        self
    }
}

/// Renders the ORDER BY terms, or `None` when the query is unordered.
pub(crate) fn order_clause(order_by: &[OrderBy]) -> Option<String> {
    if order_by.is_empty() {
        return None;
    }
    let terms: Vec<String> = order_by
        .iter()
        .map(|o| format!("{} {}", column(&o.column), o.order.as_sql()))
        .collect();
    Some(terms.join(", "))
}

/// Renders the jsonb expression carrying a row's projected columns.
pub(crate) fn data_expr(projection: &Projection, id_column: &str) -> String {
    match projection {
        Projection::All => "to_jsonb(q)".to_string(),
        Projection::Include(columns) => {
            let mut pairs = vec![format!("{}, {}", quote_literal(id_column), column(id_column))];
            pairs.extend(
                columns
                    .iter()
                    .filter(|c| c.as_str() != id_column)
                    .map(|c| format!("{}, {}", quote_literal(c), column(c))),
            );
            format!("jsonb_build_object({})", pairs.join(", "))
        }
        Projection::Exclude(columns) => {
            let names: Vec<String> = columns
                .iter()
                .filter(|c| c.as_str() != id_column)
                .map(|c| quote_literal(c))
                .collect();
            if names.is_empty() {
                "to_jsonb(q)".to_string()
            } else {
                format!("(to_jsonb(q) - ARRAY[{}]::text[])", names.join(", "))
            }
        }
    }
}
