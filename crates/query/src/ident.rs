//! Identifier and literal quoting.

use livesql_core::TableName;

/// Quotes an identifier: `a"b` becomes `"a""b"`.
pub fn quote_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for ch in ident.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Quotes a relation as `"schema"."table"`.
pub fn quote_table(name: &TableName) -> String {
    format!("{}.{}", quote_ident(name.schema()), quote_ident(name.table()))
}

/// Quotes a string literal: `it's` becomes `'it''s'`.
pub fn quote_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() + 2);
    out.push('\'');
    for ch in literal.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// A column of the query alias `q`.
pub(crate) fn column(name: &str) -> String {
    format!("q.{}", quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("people"), "\"people\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_table() {
        let name = TableName::new("public", "people");
        assert_eq!(quote_table(&name), "\"public\".\"people\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(""), "''");
    }
}
