//! Statement compiler.
//!
//! `QueryCompiler::compile` is a pure function from a [`Statement`] to SQL text
//! plus positional parameters. It performs no I/O; the PostgreSQL backend
//! executes the result and uses [`ResultShape`] to decode the rows.

use crate::builder::{data_expr, SqlBuilder};
use crate::diff::diff_statement;
use crate::ident::{quote_ident, quote_literal, quote_table};
use livesql_core::statement::TOTAL_ROW_COUNT_COLUMN;
use livesql_core::{Document, Error, QueryDefinition, Result, SessionContext, Statement, Value};
use std::collections::BTreeSet;

/// Session settings the notify trigger reads.
pub const CLIENT_ID_SETTING: &str = "client_id";
pub const STATEMENT_ID_SETTING: &str = "statement_id";
pub const STATEMENT_TARGET_SETTING: &str = "statement_target";

/// How the rows of a compiled statement are to be decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultShape {
    /// One `data` jsonb column per row.
    Documents,
    /// One row with a `total_row_count` bigint.
    Count,
    /// `action`, `row_id`, `data` per row.
    Diff,
    /// No rows; only the affected row count matters.
    Affected,
    /// Result is irrelevant.
    Ignore,
}

/// SQL text ready to execute.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledStatement {
    pub text: String,
    pub params: Vec<Value>,
    pub shape: ResultShape,
}

impl CompiledStatement {
    fn new(text: String, params: Vec<Value>, shape: ResultShape) -> Self {
        Self {
            text,
            params,
            shape,
        }
    }

    fn plain(text: impl Into<String>, shape: ResultShape) -> Self {
        Self::new(text.into(), Vec::new(), shape)
    }
}

/// Compiles statements for PostgreSQL.
#[derive(Clone, Debug)]
pub struct QueryCompiler {
    own_schema: String,
}

impl QueryCompiler {
    /// Creates a compiler whose snapshot table and session settings live
    /// under `own_schema`.
    pub fn new(own_schema: impl Into<String>) -> Self {
        Self {
            own_schema: own_schema.into(),
        }
    }

    pub fn own_schema(&self) -> &str {
        &self.own_schema
    }

    /// Fully-qualified, quoted snapshot table.
    pub fn snapshot_table(&self) -> String {
        format!("{}.reactivity", quote_ident(&self.own_schema))
    }

    /// Name of a session setting, e.g. `reactive.client_id`.
    pub fn setting(&self, name: &str) -> String {
        format!("{}.{}", self.own_schema, name)
    }

    /// Compiles one statement.
    pub fn compile(&self, statement: &Statement) -> Result<CompiledStatement> {
        match statement {
            Statement::Select(query) => self.select(query),
            Statement::Count(query) => self.count(query),
            Statement::Diff { query_id, query } => {
                query.validate()?;
                let (text, params) = diff_statement(&self.snapshot_table(), query_id, query);
                Ok(CompiledStatement::new(text, params, ResultShape::Diff))
            }
            Statement::DropSnapshot { query_id } => Ok(CompiledStatement::new(
                format!("DELETE FROM {} WHERE query_id = $1", self.snapshot_table()),
                vec![Value::String(query_id.to_string())],
                ResultShape::Affected,
            )),
            Statement::Insert {
                relation,
                documents,
            } => insert(&quote_table(relation), documents, None),
            Statement::Update {
                relation,
                filter,
                changes,
            } => {
                if changes.is_empty() {
                    return Err(Error::definition("update without changes"));
                }
                let mut b = SqlBuilder::new();
                let assignments: Vec<String> = changes
                    .iter()
                    .map(|(col, value)| format!("{} = {}", quote_ident(col), b.bind(value.clone())))
                    .collect();
                let predicate = b.filter(filter);
                b.push("UPDATE ")
                    .push(&quote_table(relation))
                    .push(" AS q SET ")
                    .push(&assignments.join(", "))
                    .push(" WHERE ")
                    .push(&predicate);
                let (text, params) = b.finish();
                Ok(CompiledStatement::new(text, params, ResultShape::Affected))
            }
            Statement::Delete { relation, filter } => {
                let mut b = SqlBuilder::new();
                let predicate = b.filter(filter);
                b.push("DELETE FROM ")
                    .push(&quote_table(relation))
                    .push(" AS q WHERE ")
                    .push(&predicate);
                let (text, params) = b.finish();
                Ok(CompiledStatement::new(text, params, ResultShape::Affected))
            }
            Statement::Upsert {
                relation,
                conflict_column,
                documents,
            } => {
                if documents.iter().any(|d| !d.contains_key(conflict_column)) {
                    return Err(Error::definition(format!(
                        "upsert document without conflict column {}",
                        conflict_column
                    )));
                }
                insert(&quote_table(relation), documents, Some(conflict_column.as_str()))
            }
            Statement::SetSessionContext(ctx) => Ok(self.set_session(ctx)),
            Statement::ResetSessionContext => Ok(self.set_session(&SessionContext {
                writer_id: None,
                statement_id: None,
                statement_target: None,
                local: false,
            })),
            Statement::Begin { isolation } => Ok(CompiledStatement::plain(
                match isolation {
                    Some(level) => format!("BEGIN ISOLATION LEVEL {}", level.as_sql()),
                    None => "BEGIN".to_string(),
                },
                ResultShape::Ignore,
            )),
            Statement::Commit => Ok(CompiledStatement::plain("COMMIT", ResultShape::Ignore)),
            Statement::Rollback => Ok(CompiledStatement::plain("ROLLBACK", ResultShape::Ignore)),
        }
    }

    fn select(&self, query: &QueryDefinition) -> Result<CompiledStatement> {
        query.validate()?;
        let mut b = SqlBuilder::new();
        b.push("SELECT ")
            .push(&data_expr(&query.projection, &query.id_column))
            .push(" AS data")
            .from_where(query)
            .order_and_window(query);
        let (text, params) = b.finish();
        Ok(CompiledStatement::new(text, params, ResultShape::Documents))
    }

    fn count(&self, query: &QueryDefinition) -> Result<CompiledStatement> {
        query.validate()?;
        let mut b = SqlBuilder::new();
        b.push("SELECT COUNT(*) AS ")
            .push(TOTAL_ROW_COUNT_COLUMN)
            .from_where(&query.unwindowed());
        let (text, params) = b.finish();
        Ok(CompiledStatement::new(text, params, ResultShape::Count))
    }

    /// Session settings are never null: an unset value is the empty string,
    /// which the notify function maps back to null.
    fn set_session(&self, ctx: &SessionContext) -> CompiledStatement {
        let local = if ctx.local { "true" } else { "false" };
        let settings = [
            (CLIENT_ID_SETTING, ctx.writer_id.as_ref().map(|w| w.to_string())),
            (STATEMENT_ID_SETTING, ctx.statement_id.as_ref().map(|s| s.to_string())),
            (
                STATEMENT_TARGET_SETTING,
                ctx.statement_target.as_ref().map(|t| t.qualified()),
            ),
        ];
        let mut params = Vec::with_capacity(settings.len());
        let calls: Vec<String> = settings
            .into_iter()
            .map(|(name, value)| {
                params.push(Value::String(value.unwrap_or_default()));
                format!(
                    "set_config({}, ${}, {})",
                    quote_literal(&self.setting(name)),
                    params.len(),
                    local
                )
            })
            .collect();
        CompiledStatement::new(
            format!("SELECT {}", calls.join(", ")),
            params,
            ResultShape::Ignore,
        )
    }
}

/// Multi-row insert over the union of the documents' columns; columns a
/// document lacks take their default. With a conflict column, rows that
/// collide on it are updated from the excluded row instead.
fn insert(table: &str, documents: &[Document], conflict: Option<&str>) -> Result<CompiledStatement> {
    if documents.is_empty() {
        return Err(Error::definition("insert without documents"));
    }
    let columns: BTreeSet<&str> = documents
        .iter()
        .flat_map(|d| d.keys().map(String::as_str))
        .collect();
    if columns.is_empty() {
        if documents.len() == 1 {
            return Ok(CompiledStatement::plain(
                format!("INSERT INTO {} DEFAULT VALUES", table),
                ResultShape::Affected,
            ));
        }
        return Err(Error::definition("insert of several empty documents"));
    }
    let mut b = SqlBuilder::new();
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let rows: Vec<String> = documents
        .iter()
        .map(|doc| {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| match doc.get(*c) {
                    Some(value) => b.bind(value.clone()),
                    None => "DEFAULT".to_string(),
                })
                .collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    b.push("INSERT INTO ")
        .push(table)
        .push(" (")
        .push(&column_list.join(", "))
        .push(") VALUES ")
        .push(&rows.join(", "));
    if let Some(conflict) = conflict {
        let assignments: Vec<String> = columns
            .iter()
            .filter(|c| **c != conflict)
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
            .collect();
        b.push(" ON CONFLICT (").push(&quote_ident(conflict)).push(")");
        if assignments.is_empty() {
            b.push(" DO NOTHING");
        } else {
            b.push(" DO UPDATE SET ").push(&assignments.join(", "));
        }
    }
    let (text, params) = b.finish();
    Ok(CompiledStatement::new(text, params, ResultShape::Affected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesql_core::{doc, Filter, OrderBy, QueryId, StatementId, TableName, WriterId};

    fn compiler() -> QueryCompiler {
        QueryCompiler::new("reactive")
    }

    fn people() -> TableName {
        TableName::new("public", "people")
    }

    #[test]
    fn test_select() {
        let query = QueryDefinition::new(people())
            .filter(Filter::starts_with("first_name", "A"))
            .order_by(OrderBy::asc("first_name"))
            .limit(10)
            .offset(20);
        let c = compiler().compile(&Statement::Select(query)).unwrap();
        assert_eq!(
            c.text,
            "SELECT to_jsonb(q) AS data FROM \"public\".\"people\" AS q \
             WHERE q.\"first_name\"::text LIKE $1 ORDER BY q.\"first_name\" ASC LIMIT $2 OFFSET $3"
        );
        assert_eq!(
            c.params,
            vec![Value::String("A%".into()), Value::Int64(10), Value::Int64(20)]
        );
        assert_eq!(c.shape, ResultShape::Documents);
    }

    #[test]
    fn test_count_ignores_window_and_order() {
        let query = QueryDefinition::new(people())
            .filter(Filter::gt("age", 18))
            .order_by(OrderBy::desc("age"))
            .limit(10);
        let c = compiler().compile(&Statement::Count(query)).unwrap();
        assert_eq!(
            c.text,
            "SELECT COUNT(*) AS total_row_count FROM \"public\".\"people\" AS q WHERE q.\"age\" > $1"
        );
        assert_eq!(c.params, vec![Value::Int64(18)]);
    }

    #[test]
    fn test_insert_union_of_columns() {
        let c = compiler()
            .compile(&Statement::Insert {
                relation: people(),
                documents: vec![
                    doc! { "_id" => "p1", "age" => 3 },
                    doc! { "_id" => "p2", "nick" => Value::Null },
                ],
            })
            .unwrap();
        assert_eq!(
            c.text,
            "INSERT INTO \"public\".\"people\" (\"_id\", \"age\", \"nick\") \
             VALUES ($1, $2, DEFAULT), ($3, DEFAULT, NULL)"
        );
        assert_eq!(c.params.len(), 3);
    }

    #[test]
    fn test_insert_requires_documents() {
        let err = compiler()
            .compile(&Statement::Insert {
                relation: people(),
                documents: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, Error::Definition { .. }));
    }

    #[test]
    fn test_upsert() {
        let c = compiler()
            .compile(&Statement::Upsert {
                relation: people(),
                conflict_column: "_id".into(),
                documents: vec![doc! { "_id" => "u1", "first_name" => "Mike", "last_name" => "Upsert" }],
            })
            .unwrap();
        assert_eq!(
            c.text,
            "INSERT INTO \"public\".\"people\" (\"_id\", \"first_name\", \"last_name\") \
             VALUES ($1, $2, $3) ON CONFLICT (\"_id\") DO UPDATE SET \
             \"first_name\" = EXCLUDED.\"first_name\", \"last_name\" = EXCLUDED.\"last_name\""
        );
        assert_eq!(c.shape, ResultShape::Affected);

        let c = compiler()
            .compile(&Statement::Upsert {
                relation: people(),
                conflict_column: "_id".into(),
                documents: vec![doc! { "_id" => "u1" }],
            })
            .unwrap();
        assert!(c.text.ends_with("ON CONFLICT (\"_id\") DO NOTHING"));

        let err = compiler()
            .compile(&Statement::Upsert {
                relation: people(),
                conflict_column: "_id".into(),
                documents: vec![doc! { "first_name" => "Mike" }],
            })
            .unwrap_err();
        assert!(matches!(err, Error::Definition { .. }));
    }

    #[test]
    fn test_update_and_delete() {
        let c = compiler()
            .compile(&Statement::Update {
                relation: people(),
                filter: Filter::eq("_id", "p1"),
                changes: doc! { "age" => 4 },
            })
            .unwrap();
        assert_eq!(
            c.text,
            "UPDATE \"public\".\"people\" AS q SET \"age\" = $1 WHERE q.\"_id\" = $2"
        );
        let c = compiler()
            .compile(&Statement::Delete {
                relation: people(),
                filter: Filter::All,
            })
            .unwrap();
        assert_eq!(c.text, "DELETE FROM \"public\".\"people\" AS q WHERE TRUE");
    }

    #[test]
    fn test_session_context() {
        let c = compiler()
            .compile(&Statement::SetSessionContext(SessionContext {
                writer_id: Some(WriterId::from("c1")),
                statement_id: Some(StatementId::from("s1")),
                statement_target: Some(people()),
                local: true,
            }))
            .unwrap();
        assert_eq!(
            c.text,
            "SELECT set_config('reactive.client_id', $1, true), \
             set_config('reactive.statement_id', $2, true), \
             set_config('reactive.statement_target', $3, true)"
        );
        assert_eq!(
            c.params,
            vec![
                Value::String("c1".into()),
                Value::String("s1".into()),
                Value::String("public.people".into())
            ]
        );
        let reset = compiler().compile(&Statement::ResetSessionContext).unwrap();
        assert!(reset.text.contains("false"));
        assert!(reset.params.iter().all(|p| p == &Value::String(String::new())));
    }

    #[test]
    fn test_drop_snapshot() {
        let c = compiler()
            .compile(&Statement::DropSnapshot {
                query_id: QueryId::from("q1"),
            })
            .unwrap();
        assert_eq!(c.text, "DELETE FROM \"reactive\".reactivity WHERE query_id = $1");
        assert_eq!(c.params, vec![Value::String("q1".into())]);
    }
}
