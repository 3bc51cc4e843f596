//! Property-based tests for the statement compiler.

use livesql_core::{Filter, QueryDefinition, QueryId, Statement, TableName, Value};
use livesql_query::ident::quote_ident;
use livesql_query::QueryCompiler;
use proptest::prelude::*;

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Int64),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn arb_filter() -> impl Strategy<Value = Filter> {
    let leaf = prop_oneof![
        Just(Filter::All),
        ("[a-z]{1,6}", arb_value()).prop_map(|(c, v)| Filter::eq(c, v)),
        ("[a-z]{1,6}", arb_value()).prop_map(|(c, v)| Filter::gt(c, v)),
        ("[a-z]{1,6}", "[a-z%_]{0,6}").prop_map(|(c, p)| Filter::like(c, p)),
        ("[a-z]{1,6}", prop::collection::vec(arb_value(), 0..4))
            .prop_map(|(c, vs)| Filter::in_list(c, vs)),
        "[a-z]{1,6}".prop_map(Filter::IsNull),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Filter::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Filter::Or),
            inner.prop_map(|f| Filter::Not(Box::new(f))),
        ]
    })
}

/// Highest `$n` placeholder referenced in `sql`.
fn max_placeholder(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if let Ok(n) = sql[start..end].parse::<usize>() {
                max = max.max(n);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    max
}

proptest! {
    #[test]
    fn prop_select_params_match_placeholders(filter in arb_filter(), limit in prop::option::of(0u64..100)) {
        let mut query = QueryDefinition::new(TableName::new("public", "people")).filter(filter);
        query.limit = limit;
        let compiled = QueryCompiler::new("reactive").compile(&Statement::Select(query)).unwrap();
        prop_assert_eq!(max_placeholder(&compiled.text), compiled.params.len());
        prop_assert!(compiled.params.iter().all(|p| !p.is_null()));
    }

    #[test]
    fn prop_diff_params_match_placeholders(filter in arb_filter()) {
        let query = QueryDefinition::new(TableName::new("public", "people")).filter(filter);
        let compiled = QueryCompiler::new("reactive")
            .compile(&Statement::Diff { query_id: QueryId::from("q"), query })
            .unwrap();
        prop_assert_eq!(max_placeholder(&compiled.text), compiled.params.len());
    }

    #[test]
    fn prop_quote_ident_balances_quotes(ident in ".{0,12}") {
        let quoted = quote_ident(&ident);
        prop_assert!(quoted.starts_with('"') && quoted.ends_with('"'));
        let inner = &quoted[1..quoted.len() - 1];
        prop_assert_eq!(inner.replace("\"\"", "\""), ident);
    }
}
