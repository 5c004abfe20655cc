//! SQL statement splitting for migration bodies.
//!
//! Drivers execute one prepared statement at a time, so multi-statement
//! bodies are split on top-level semicolons. Semicolons inside quoted
//! strings, quoted identifiers, comments and dollar-quoted blocks
//! (`$$ ... $$`, `$body$ ... $body$`) do not end a statement.

use sqlx::AnyConnection;
use tracing::trace;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scan {
    Code,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
    DollarQuote(String),
}

/// Split SQL into individual statements.
///
/// Fragments that contain only whitespace or comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = Scan::Code;
    let mut chars = sql.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match &state {
            Scan::Code => match c {
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                    continue;
                }
                '\'' => state = Scan::SingleQuote,
                '"' => state = Scan::DoubleQuote,
                '-' if matches!(chars.peek(), Some((_, '-'))) => state = Scan::LineComment,
                '/' if matches!(chars.peek(), Some((_, '*'))) => state = Scan::BlockComment,
                '$' => {
                    if let Some(tag) = dollar_tag_at(&sql[idx..]) {
                        for _ in 1..tag.chars().count() {
                            chars.next();
                        }
                        current.push_str(&tag);
                        state = Scan::DollarQuote(tag);
                        continue;
                    }
                }
                _ => {}
            },
            Scan::SingleQuote => {
                if c == '\'' {
                    state = Scan::Code;
                }
            }
            Scan::DoubleQuote => {
                if c == '"' {
                    state = Scan::Code;
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    current.push(c);
                    if let Some((_, slash)) = chars.next() {
                        current.push(slash);
                    }
                    state = Scan::Code;
                    continue;
                }
            }
            Scan::DollarQuote(tag) => {
                if c == '$' && sql[idx..].starts_with(tag.as_str()) {
                    for _ in 1..tag.chars().count() {
                        chars.next();
                    }
                    current.push_str(tag);
                    state = Scan::Code;
                    continue;
                }
            }
        }
        current.push(c);
    }

    push_statement(&mut statements, &current);
    statements
}

/// Return the dollar-quote tag starting at `s` (which begins with `$`).
fn dollar_tag_at(s: &str) -> Option<String> {
    let rest = &s[1..];
    let end = rest.find('$')?;
    let label = &rest[..end];
    let valid = label
        .chars()
        .enumerate()
        .all(|(i, ch)| ch == '_' || ch.is_alphabetic() || (i > 0 && ch.is_ascii_digit()));
    if valid {
        Some(format!("${}$", label))
    } else {
        None
    }
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let stmt = fragment.trim();
    if stmt.is_empty() || is_comment_only(stmt) {
        return;
    }
    statements.push(stmt.to_string());
}

fn is_comment_only(fragment: &str) -> bool {
    let mut rest = fragment.trim_start();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(pos) => after[pos + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(pos) => after[pos + 2..].trim_start(),
                None => "",
            };
        } else {
            return false;
        }
    }
}

/// Execute each statement of a migration body on the given connection.
pub async fn execute_statements(conn: &mut AnyConnection, statements: &[String]) -> Result<()> {
    for statement in statements {
        trace!(statement = %statement, "Executing migration statement");
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_statements() {
        let stmts = split_sql_statements("SELECT 1; SELECT 2; SELECT 3;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_last_statement_without_semicolon() {
        let stmts = split_sql_statements("CREATE TABLE t (id INTEGER);\nALTER TABLE t ADD COLUMN x INTEGER");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "ALTER TABLE t ADD COLUMN x INTEGER");
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION touch() RETURNS void AS $$
BEGIN
    SELECT 1;
    SELECT 2;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE FUNCTION touch()"));
        assert!(stmts[0].contains("SELECT 2;"));
        assert!(stmts[0].ends_with("$$ LANGUAGE plpgsql"));
        assert_eq!(stmts[1], "SELECT 3");
    }

    #[test]
    fn test_split_with_tagged_dollar_quote() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$; SELECT 4;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT 4"]);
    }

    #[test]
    fn test_positional_parameters_are_not_dollar_quotes() {
        let stmts = split_sql_statements("UPDATE t SET x = $1 WHERE id = $2; SELECT 1;");
        assert_eq!(stmts, vec!["UPDATE t SET x = $1 WHERE id = $2", "SELECT 1"]);
    }

    #[test]
    fn test_semicolon_inside_string_literal() {
        let stmts = split_sql_statements("INSERT INTO t (s) VALUES ('a;b'); SELECT 1;");
        assert_eq!(stmts, vec!["INSERT INTO t (s) VALUES ('a;b')", "SELECT 1"]);
    }

    #[test]
    fn test_comment_only_fragments_are_skipped() {
        let sql = "-- nothing to do here;\n/* still; nothing */\nSELECT 1;\n-- trailing";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].ends_with("SELECT 1"));
    }

    #[test]
    fn test_empty_body() {
        assert!(split_sql_statements("   \n ; ;").is_empty());
    }
}
