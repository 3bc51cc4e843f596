//! SQL LIKE pattern matching.
//!
//! One implementation shared by filter evaluation in embedded stores, with the
//! same semantics PostgreSQL applies to `LIKE`:
//! - `%` matches zero or more characters
//! - `_` matches exactly one character
//! - `\` escapes the next character
//!
//! Matching is **case-sensitive** and operates on Unicode scalar values.

/// SQL LIKE pattern matching.
///
/// ```
/// use livesql_core::pattern_match::like;
/// assert!(like("hello", "h%o"));
/// assert!(like("hello", "_ello"));
/// assert!(like("50%", "50\\%"));
/// assert!(!like("hello", "world"));
/// ```
pub fn like(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_recursive(&v, &p, 0, 0)
}

fn like_recursive(v: &[char], p: &[char], vi: usize, pi: usize) -> bool {
    if pi == p.len() {
        return vi == v.len();
    }
    match p[pi] {
        '%' => {
            // collapse runs of %
            let mut next = pi;
            while next < p.len() && p[next] == '%' {
                next += 1;
            }
            (vi..=v.len()).any(|skip| like_recursive(v, p, skip, next))
        }
        '_' => vi < v.len() && like_recursive(v, p, vi + 1, pi + 1),
        '\\' if pi + 1 < p.len() => {
            vi < v.len() && v[vi] == p[pi + 1] && like_recursive(v, p, vi + 1, pi + 2)
        }
        ch => vi < v.len() && v[vi] == ch && like_recursive(v, p, vi + 1, pi + 1),
    }
}

/// Escapes `%`, `_` and `\` so `literal` matches only itself.
pub fn escape_like(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Builds the LIKE pattern for "starts with `prefix`".
pub fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = escape_like(prefix);
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_wildcards() {
        assert!(like("Anna", "A%"));
        assert!(like("A", "A%"));
        assert!(!like("Bob", "A%"));
        assert!(like("cat", "c_t"));
        assert!(!like("cart", "c_t"));
        assert!(like("", "%"));
        assert!(like("abc", "%%c"));
    }

    #[test]
    fn test_like_is_case_sensitive() {
        assert!(!like("anna", "A%"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_like("a_b%"), "a\\_b\\%");
        assert!(like("a_b", &escape_like("a_b")));
        assert!(!like("axb", &escape_like("a_b")));
    }

    #[test]
    fn test_prefix_pattern() {
        let p = prefix_pattern("data_");
        assert_eq!(p, "data\\_%");
        assert!(like("data_loading1", &p));
        assert!(!like("dataXloading", &p));
    }
}
