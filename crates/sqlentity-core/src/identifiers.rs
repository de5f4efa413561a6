//! SQL identifier quoting and validation.

use regex::Regex;
use std::sync::LazyLock;

static PLAIN_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|e| unreachable!("{e}"))
});

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are doubled.
///
/// ```
/// use sqlentity_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backticks.
///
/// ```
/// use sqlentity_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Whether `name` is a bare identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// Schema registration only accepts such names, so generated SQL never
/// depends on quoting to stay well-formed.
pub fn is_plain_identifier(name: &str) -> bool {
    PLAIN_IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_quoting() {
        assert_eq!(quote_ident(""), "\"\"");
        assert_eq!(quote_ident("select"), "\"select\"");
        assert_eq!(quote_ident("a\"b\"c"), "\"a\"\"b\"\"c\"");
        assert_eq!(quote_ident("first name"), "\"first name\"");
    }

    #[test]
    fn mysql_quoting() {
        assert_eq!(quote_ident_mysql("users"), "`users`");
        assert_eq!(quote_ident_mysql("a`b"), "`a``b`");
    }

    #[test]
    fn plain_identifiers() {
        assert!(is_plain_identifier("users"));
        assert!(is_plain_identifier("_private2"));
        assert!(!is_plain_identifier("2fast"));
        assert!(!is_plain_identifier("drop table"));
        assert!(!is_plain_identifier("name;--"));
        assert!(!is_plain_identifier(""));
    }
}
