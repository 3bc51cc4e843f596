//! DDL for the engine's own schema and the notify triggers.

use crate::compiler::{CLIENT_ID_SETTING, STATEMENT_ID_SETTING, STATEMENT_TARGET_SETTING};
use crate::ident::{quote_ident, quote_literal, quote_table};
use livesql_core::TableName;

/// Name of the function the notify triggers execute.
pub const NOTIFY_FUNCTION: &str = "notify_statement_changes";

/// Statements creating the own schema, the snapshot table and the notify
/// function. Each is idempotent; run them in order.
pub fn setup_statements(own_schema: &str, channel: &str) -> Vec<String> {
    let schema = quote_ident(own_schema);
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", schema),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.reactivity (\
             query_id text NOT NULL, \
             row_id text NOT NULL, \
             hash text NOT NULL, \
             PRIMARY KEY (query_id, row_id))",
            schema
        ),
        notify_function(own_schema, channel),
    ]
}

fn notify_function(own_schema: &str, channel: &str) -> String {
    let setting = |name: &str| {
        format!(
            "NULLIF(current_setting({}, true), '')",
            quote_literal(&format!("{}.{}", own_schema, name))
        )
    };
    format!(
        "CREATE OR REPLACE FUNCTION {schema}.{func}() RETURNS trigger AS $$\n\
         DECLARE\n\
         \x20   client_id text := {client};\n\
         \x20   statement_id text := {statement};\n\
         \x20   statement_target text := {target};\n\
         BEGIN\n\
         \x20   IF statement_target IS DISTINCT FROM TG_TABLE_SCHEMA || '.' || TG_TABLE_NAME THEN\n\
         \x20       statement_id := NULL;\n\
         \x20   END IF;\n\
         \x20   PERFORM pg_notify({channel}, json_build_object(\n\
         \x20       'type', 'STATEMENT',\n\
         \x20       'schema', TG_TABLE_SCHEMA,\n\
         \x20       'table', TG_TABLE_NAME,\n\
         \x20       'action', TG_OP,\n\
         \x20       'client_id', client_id,\n\
         \x20       'statement_id', statement_id,\n\
         \x20       'statement_target', statement_target\n\
         \x20   )::text);\n\
         \x20   RETURN NULL;\n\
         END;\n\
         $$ LANGUAGE plpgsql",
        schema = quote_ident(own_schema),
        func = NOTIFY_FUNCTION,
        client = setting(CLIENT_ID_SETTING),
        statement = setting(STATEMENT_ID_SETTING),
        target = setting(STATEMENT_TARGET_SETTING),
        channel = quote_literal(channel),
    )
}

/// Trigger name for a relation: `<schema>_<table>_notify_stmt`.
pub fn trigger_name(relation: &TableName) -> String {
    format!("{}_{}_notify_stmt", relation.schema(), relation.table())
}

/// Statements (re)installing the statement-level notify trigger on `relation`.
pub fn install_trigger_statements(own_schema: &str, relation: &TableName) -> Vec<String> {
    let trigger = quote_ident(&trigger_name(relation));
    let table = quote_table(relation);
    vec![
        format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, table),
        format!(
            "CREATE TRIGGER {} AFTER INSERT OR UPDATE OR DELETE ON {} \
             FOR EACH STATEMENT EXECUTE FUNCTION {}.{}()",
            trigger,
            table,
            quote_ident(own_schema),
            NOTIFY_FUNCTION
        ),
    ]
}

/// Catalog query listing the relations a view reads from directly.
///
/// Parameters: `$1` view schema, `$2` view name. Columns: `table_schema`,
/// `table_name`, `is_view`. Callers recurse into rows with `is_view`.
pub const VIEW_DEPENDENCIES_QUERY: &str = "\
SELECT ns_d.nspname::text AS table_schema, cl_d.relname::text AS table_name, (cl_d.relkind = 'v') AS is_view \
FROM pg_rewrite AS r \
JOIN pg_class AS cl_r ON r.ev_class = cl_r.oid \
JOIN pg_namespace AS ns_r ON cl_r.relnamespace = ns_r.oid \
JOIN pg_depend AS d ON r.oid = d.objid \
JOIN pg_class AS cl_d ON d.refobjid = cl_d.oid \
JOIN pg_namespace AS ns_d ON cl_d.relnamespace = ns_d.oid \
WHERE cl_d.relkind IN ('r', 'v', 'p') \
AND ns_r.nspname = $1 AND cl_r.relname = $2 AND cl_d.oid <> cl_r.oid \
GROUP BY ns_d.nspname, cl_d.relname, cl_d.relkind \
ORDER BY ns_d.nspname, cl_d.relname";

/// Catalog query telling whether a relation is a view. Parameters: `$1`
/// schema, `$2` name. Returns no row if the relation does not exist.
pub const RELATION_KIND_QUERY: &str = "\
SELECT (c.relkind = 'v') AS is_view FROM pg_class AS c \
JOIN pg_namespace AS n ON c.relnamespace = n.oid \
WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'v', 'p')";
