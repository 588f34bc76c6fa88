//! Splitting command text into statements.
//!
//! Uses the [sqlparser](https://docs.rs/sqlparser/) tokenizer with the
//! backend's dialect, so semicolons inside string literals, quoted
//! identifiers and comments never end a statement. Statement text is sliced
//! from the input unchanged.

use crate::models::DatabaseType;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use tracing::debug;

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Split `sql` on top-level semicolons.
///
/// Segments holding only whitespace or comments are dropped. Text the
/// tokenizer rejects is returned whole so the database reports the error.
pub(crate) fn split_statements(sql: &str, db_type: DatabaseType) -> Vec<&str> {
    let dialect = get_dialect(db_type);
    let tokens = match Tokenizer::new(dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize_with_location()
    {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!(error = %e, "Could not tokenize command; sending it as one statement");
            let whole = sql.trim();
            return if whole.is_empty() { Vec::new() } else { vec![whole] };
        }
    };

    let lines = line_starts(sql);
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;

    for token in &tokens {
        match token.token {
            Token::SemiColon => {
                let end = byte_offset(sql, &lines, token.span.start);
                if has_content {
                    statements.push(sql[start..end].trim());
                }
                start = end + 1;
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_content = true,
        }
    }

    if has_content && start < sql.len() {
        statements.push(sql[start..].trim());
    }
    statements
}

/// Byte offset of the first character of every line.
fn line_starts(sql: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Tokenizer locations are 1-based and count characters, not bytes.
fn byte_offset(sql: &str, lines: &[usize], location: Location) -> usize {
    let line = (location.line as usize).saturating_sub(1);
    let Some(&line_start) = lines.get(line) else {
        return sql.len();
    };
    let column = (location.column as usize).saturating_sub(1);
    sql[line_start..]
        .char_indices()
        .nth(column)
        .map_or(sql.len(), |(i, _)| line_start + i)
}
