//! # SQL Safety Layer
//!
//! Every statement the engine builds goes through this module. Values are
//! bound as parameters wherever SQLite allows it; the few places that cannot
//! be parameterized (identifiers, column types, `DEFAULT` clauses, pragma
//! values) are rendered here.
//!
//! ## The Contract
//!
//! - [`escape_identifier`] is applied to every table and column name that is
//!   interpolated into a statement. A table literally named
//!   `foo"; DROP TABLE bar; --` becomes one quoted identifier.
//! - [`cell_value_to_sql`] renders a complete literal. Concatenating its
//!   output with other fragments never closes a quote early.
//!
//! ```text
//! escape_identifier("foo\"bar")   →  "foo""bar"
//! cell_value_to_sql('foo'bar)     →  'foo''bar'
//! cell_value_to_sql(NULL)         →  NULL
//! cell_value_to_sql([de ad be ef])→  X'deadbeef'
//! ```

use crate::error::{Error, Result};
use crate::types::CellValue;

// =============================================================================
// Identifiers and Literals
// =============================================================================

/// Quotes an identifier, doubling any embedded double quotes.
pub fn escape_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Quotes a string literal, doubling any embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders a cell as a standalone SQL literal.
pub fn cell_value_to_sql(value: &CellValue) -> String {
    match value {
        CellValue::Null => "NULL".to_string(),
        CellValue::Integer(i) => i.to_string(),
        CellValue::Float(f) => float_literal(*f),
        CellValue::Text(s) => quote_literal(s),
        CellValue::Blob(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                out.push_str(&format!("{b:02x}"));
            }
            out.push('\'');
            out
        }
    }
}

/// Floats need a decimal point or exponent so SQLite keeps them REAL.
/// Non-finite values have no literal form and become NULL.
fn float_literal(f: f64) -> String {
    if !f.is_finite() {
        return "NULL".to_string();
    }
    let s = f.to_string();
    if s.contains(['.', 'e', 'E']) {
        s
    } else {
        format!("{s}.0")
    }
}

/// Returns `?, ?, ?` with `count` placeholders.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

// =============================================================================
// DDL Fragments
// =============================================================================

/// Validates a column type before it is interpolated into DDL.
///
/// Types like `INTEGER`, `VARCHAR(20)` or `DECIMAL(10, 2)` pass. Anything
/// with quotes, semicolons or comment markers is rejected. An empty type is
/// allowed (SQLite columns may be typeless).
pub fn validate_column_type(column_type: &str) -> Result<&str> {
    let trimmed = column_type.trim();
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '+' | '-');
    if !trimmed.chars().all(allowed) || trimmed.contains("--") {
        return Err(Error::Validation(format!(
            "unsupported column type '{column_type}'"
        )));
    }
    Ok(trimmed)
}

/// Renders the `DEFAULT` clause for `ALTER TABLE ... ADD COLUMN`.
///
/// - `null` / `NULL` → `DEFAULT NULL`
/// - numeric strings → inlined number
/// - anything else → quoted string literal
pub fn default_clause(default_value: &str) -> String {
    let trimmed = default_value.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return " DEFAULT NULL".to_string();
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return format!(" DEFAULT {i}");
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return format!(" DEFAULT {}", float_literal(f));
        }
    }
    format!(" DEFAULT {}", quote_literal(default_value))
}

/// Renders a column definition for `CREATE TABLE`.
pub fn column_definition(name: &str, column_type: &str, primary_key: bool, not_null: bool) -> Result<String> {
    let column_type = validate_column_type(column_type)?;
    let mut sql = escape_identifier(name);
    if !column_type.is_empty() {
        sql.push(' ');
        sql.push_str(column_type);
    }
    if primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if not_null {
        sql.push_str(" NOT NULL");
    }
    Ok(sql)
}

// =============================================================================
// Literal Redaction
// =============================================================================

/// Replaces every literal in `sql` with `?` and every comment with a space.
///
/// Keywords, bound-parameter markers and quoted identifiers (`"..."`,
/// `` `...` ``, `[...]`) are kept, so the shape of the statement survives
/// while the data written into it does not.
///
/// ```text
/// INSERT INTO "t" VALUES ('pw', 42, x'00') -- note
///   →  INSERT INTO "t" VALUES (?, ?, ?)
/// ```
pub fn redact_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                skip_quoted(&mut chars, '\'');
                // a blob literal's X prefix goes with it
                if out.ends_with(['x', 'X']) && !ends_with_word(&out[..out.len() - 1]) {
                    out.pop();
                }
                out.push('?');
            }
            '"' | '`' => {
                out.push(c);
                copy_quoted(&mut chars, c, true, &mut out);
            }
            '[' => {
                out.push(c);
                copy_quoted(&mut chars, ']', false, &mut out);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                out.push(' ');
            }
            c if starts_number(c, chars.peek().copied()) && !ends_with_word(&out) => {
                skip_number(&mut chars, c);
                out.push('?');
            }
            _ => out.push(c),
        }
    }
    out
}

fn ends_with_word(s: &str) -> bool {
    s.chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '?' | ':' | '@'))
}

fn starts_number(c: char, next: Option<char>) -> bool {
    c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit()))
}

/// Consumes a quoted run up to its closing `close`; a doubled close is an escape.
fn skip_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, close: char) {
    while let Some(c) = chars.next() {
        if c == close {
            if chars.peek() == Some(&close) {
                chars.next();
            } else {
                return;
            }
        }
    }
}

/// Copies a quoted identifier through its closing `close`. Bracket quotes have no escape.
fn copy_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, close: char, doubled: bool, out: &mut String) {
    while let Some(c) = chars.next() {
        out.push(c);
        if c == close {
            if doubled && chars.peek() == Some(&close) {
                chars.next();
                out.push(close);
            } else {
                return;
            }
        }
    }
}

/// Consumes the rest of a numeric literal, including hex digits and exponents.
fn skip_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, first: char) {
    let mut prev = first;
    while let Some(&c) = chars.peek() {
        let exponent_sign = matches!(c, '+' | '-') && matches!(prev, 'e' | 'E');
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
            prev = c;
            chars.next();
        } else {
            break;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("users"), "\"users\"");
        assert_eq!(escape_identifier("foo\"bar"), "\"foo\"\"bar\"");
        assert_eq!(
            escape_identifier("foo\"; DROP TABLE bar; --"),
            "\"foo\"\"; DROP TABLE bar; --\""
        );
    }

    #[test]
    fn test_cell_value_to_sql() {
        assert_eq!(cell_value_to_sql(&CellValue::Text("foo'bar".into())), "'foo''bar'");
        assert_eq!(cell_value_to_sql(&CellValue::Null), "NULL");
        assert_eq!(cell_value_to_sql(&CellValue::Integer(-7)), "-7");
        assert_eq!(cell_value_to_sql(&CellValue::Float(2.0)), "2.0");
        assert_eq!(cell_value_to_sql(&CellValue::Float(0.5)), "0.5");
        assert_eq!(
            cell_value_to_sql(&CellValue::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF])),
            "X'deadbeef'"
        );
    }

    #[test]
    fn test_column_type_validation() {
        assert!(validate_column_type("INTEGER").is_ok());
        assert!(validate_column_type("VARCHAR(20)").is_ok());
        assert!(validate_column_type("DECIMAL(10, 2)").is_ok());
        assert!(validate_column_type("").is_ok());
        assert!(validate_column_type("TEXT); DROP TABLE x").is_err());
        assert!(validate_column_type("TEXT -- comment").is_err());
        assert!(validate_column_type("TEXT'").is_err());
    }

    #[test]
    fn test_default_clause() {
        assert_eq!(default_clause("null"), " DEFAULT NULL");
        assert_eq!(default_clause("NULL"), " DEFAULT NULL");
        assert_eq!(default_clause("42"), " DEFAULT 42");
        assert_eq!(default_clause("1.5"), " DEFAULT 1.5");
        assert_eq!(default_clause("it's"), " DEFAULT 'it''s'");
    }

    #[test]
    fn test_redact_literals_masks_data() {
        assert_eq!(
            redact_literals("INSERT INTO \"t\" VALUES ('pw', 42, x'00') -- note"),
            "INSERT INTO \"t\" VALUES (?, ?, ?) \n"
        );
        assert_eq!(
            redact_literals("UPDATE t SET v = 'it''s' WHERE id = ?1 /* 'c' */"),
            "UPDATE t SET v = ? WHERE id = ?1  "
        );
        assert_eq!(redact_literals("SELECT 1.5e+3, -7, .25"), "SELECT ?, -?, ?");
    }

    #[test]
    fn test_redact_literals_keeps_identifiers() {
        assert_eq!(
            redact_literals("SELECT \"a'b\", [c 1], `d\"\"`, col2, x FROM t1"),
            "SELECT \"a'b\", [c 1], `d\"\"`, col2, x FROM t1"
        );
        assert_eq!(redact_literals("SELECT \"q\"\"'s\" FROM t"), "SELECT \"q\"\"'s\" FROM t");
    }

    proptest! {
        /// SQLite parses the escaped identifier back to the original name.
        #[test]
        fn prop_identifier_round_trips_through_sqlite(name in "[a-zA-Z0-9 _\"';-]{1,24}") {
            let conn = rusqlite::Connection::open_in_memory().unwrap();
            let sql = format!("CREATE TABLE {} (v)", escape_identifier(&name));
            conn.execute_batch(&sql).unwrap();
            let stored: String = conn
                .query_row("SELECT name FROM sqlite_master WHERE type = 'table'", [], |row| row.get(0))
                .unwrap();
            prop_assert_eq!(stored, name);
        }

        /// A literal always evaluates to the original text.
        #[test]
        fn prop_text_literal_round_trips(text in "[a-zA-Z0-9 '\";-]{0,32}") {
            let conn = rusqlite::Connection::open_in_memory().unwrap();
            let sql = format!("SELECT {}", cell_value_to_sql(&CellValue::Text(text.clone())));
            let value: String = conn.query_row(&sql, [], |row| row.get(0)).unwrap();
            prop_assert_eq!(value, text);
        }
    }
}
