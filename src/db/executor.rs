//! Command execution engine.
//!
//! Runs one command on one borrowed connection, which is either a fresh ad hoc
//! connection or the connection inside a scoped transaction. The executor
//! never opens, commits or closes anything itself.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific execution
//! - `postgres`: PostgreSQL-specific execution
//! - `sqlite`: SQLite-specific execution
//!
//! Each submodule provides identical functionality adapted to the database's type system.
//!
//! Commands without parameters are sent as raw SQL, so a batch of several
//! statements works. Commands with parameters are prepared and may contain
//! exactly one statement.
//!
//! Tabular results are collected statement by statement. Every result set
//! with rows becomes a table, and a row-returning statement that matched
//! nothing still yields a table with its columns and no rows, so table
//! positions always follow statement order.

use crate::db::connection::ConnectionRef;
use crate::db::macros::dispatch_connection;
use crate::db::script::split_statements;
use crate::db::types::{RowToJson, columns_to_table, rows_to_table};
use crate::error::{DbError, DbResult};
use crate::models::{DataTable, DatabaseType, QueryParam, Scalar};
use futures_util::TryStreamExt;
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Database, Either, Encode, Execute, Executor, Statement, Type};
use std::time::Instant;
use tracing::debug;

/// What to do with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    NonQuery,
    Scalar,
    Tables,
}

/// Result of an [`Operation`].
#[derive(Debug)]
pub(crate) enum Outcome {
    RowsAffected(u64),
    Scalar(Scalar),
    Tables(Vec<DataTable>),
}

impl Outcome {
    pub(crate) fn into_rows_affected(self) -> DbResult<u64> {
        match self {
            Self::RowsAffected(n) => Ok(n),
            other => Err(mismatch("rows affected", &other)),
        }
    }

    pub(crate) fn into_scalar(self) -> DbResult<Scalar> {
        match self {
            Self::Scalar(s) => Ok(s),
            other => Err(mismatch("scalar", &other)),
        }
    }

    pub(crate) fn into_tables(self) -> DbResult<Vec<DataTable>> {
        match self {
            Self::Tables(t) => Ok(t),
            other => Err(mismatch("tables", &other)),
        }
    }
}

fn mismatch(expected: &str, got: &Outcome) -> DbError {
    DbError::internal(format!("expected {expected} outcome, got {got:?}"))
}

/// Run `sql` on `conn`.
pub(crate) async fn run(
    conn: ConnectionRef<'_>,
    sql: &str,
    params: &[QueryParam],
    operation: Operation,
) -> DbResult<Outcome> {
    let start = Instant::now();
    debug!(
        sql = %sql,
        params = params.len(),
        operation = ?operation,
        "Executing command"
    );

    let outcome = match operation {
        Operation::NonQuery => Outcome::RowsAffected(dispatch_connection!(conn, {
            MySql(c) => mysql::execute(c, sql, params).await?,
            Postgres(c) => postgres::execute(c, sql, params).await?,
            SQLite(c) => sqlite::execute(c, sql, params).await?,
        })),
        Operation::Scalar => Outcome::Scalar(dispatch_connection!(conn, {
            MySql(c) => mysql::scalar(c, sql, params).await?,
            Postgres(c) => postgres::scalar(c, sql, params).await?,
            SQLite(c) => sqlite::scalar(c, sql, params).await?,
        })),
        Operation::Tables => Outcome::Tables(dispatch_connection!(conn, {
            MySql(c) => mysql::tables(c, sql, params).await?,
            Postgres(c) => postgres::tables(c, sql, params).await?,
            SQLite(c) => sqlite::tables(c, sql, params).await?,
        })),
    };

    debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Command finished"
    );
    Ok(outcome)
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn first_column<R: RowToJson>(row: Option<R>) -> Scalar {
    match row {
        Some(row) if !row.columns().is_empty() => Scalar::Value(row.column_value(0)),
        _ => Scalar::NoRows,
    }
}

/// Bind every parameter, in order, to a prepared query.
fn bind_params<'q, DB>(
    mut query: Query<'q, DB, DB::Arguments<'q>>,
    params: &'q [QueryParam],
) -> Query<'q, DB, DB::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
    Json<&'q JsonValue>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            // SQLite stores this as TEXT
            QueryParam::Json(v) => query.bind(Json(v)),
        };
    }
    query
}

/// Close the current result set. Result sets without rows add no table.
fn flush_table<R: RowToJson>(tables: &mut Vec<DataTable>, rows: &mut Vec<R>) {
    if !rows.is_empty() {
        tables.push(rows_to_table(rows));
        rows.clear();
    }
}

/// Run one statement and append the tables it produced.
///
/// When no result set had rows, the statement is described and contributes
/// an empty table if it has result columns.
async fn collect_tables<'q, DB, E>(
    conn: &mut DB::Connection,
    sql: &'q str,
    query: E,
    tables: &mut Vec<DataTable>,
) -> DbResult<()>
where
    DB: Database,
    DB::Row: RowToJson,
    E: 'q + Execute<'q, DB>,
    for<'e> &'e mut DB::Connection: Executor<'e, Database = DB>,
{
    let before = tables.len();
    let mut current: Vec<DB::Row> = Vec::new();
    {
        let mut stream = (&mut *conn).fetch_many(query);
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(_) => flush_table(tables, &mut current),
                Either::Right(row) => current.push(row),
            }
        }
    }
    flush_table(tables, &mut current);

    if tables.len() == before {
        if let Some(table) = describe_table::<DB>(conn, sql).await {
            tables.push(table);
        }
    }
    Ok(())
}

/// Empty table with the statement's result columns, if it has any.
async fn describe_table<DB>(conn: &mut DB::Connection, sql: &str) -> Option<DataTable>
where
    DB: Database,
    for<'e> &'e mut DB::Connection: Executor<'e, Database = DB>,
{
    match (&mut *conn).prepare(sql).await {
        Ok(statement) if !statement.columns().is_empty() => {
            Some(columns_to_table(statement.columns()))
        }
        Ok(_) => None,
        Err(e) => {
            // e.g. DDL that cannot be prepared again once it has run
            debug!(error = %e, "Statement could not be described; no table added");
            None
        }
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::MySql;
    use sqlx::mysql::MySqlConnection;

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        // Raw SQL when there is nothing to bind
        // (some SQL like CREATE PROCEDURE doesn't support prepared statements)
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    pub async fn scalar(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Scalar> {
        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .fetch_optional(&mut *conn)
                .await?
        };
        Ok(first_column(row))
    }

    pub async fn tables(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DataTable>> {
        let mut tables = Vec::new();
        if params.is_empty() {
            for statement in split_statements(sql, DatabaseType::MySQL) {
                collect_tables::<MySql, _>(&mut *conn, statement, statement, &mut tables).await?;
            }
        } else {
            let query = bind_params(sqlx::query(sql), params);
            collect_tables::<MySql, _>(&mut *conn, sql, query, &mut tables).await?;
        }
        Ok(tables)
    }
}

mod postgres {
    use super::*;
    use sqlx::Postgres;
    use sqlx::postgres::PgConnection;

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    pub async fn scalar(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Scalar> {
        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .fetch_optional(&mut *conn)
                .await?
        };
        Ok(first_column(row))
    }

    pub async fn tables(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DataTable>> {
        let mut tables = Vec::new();
        if params.is_empty() {
            for statement in split_statements(sql, DatabaseType::PostgreSQL) {
                collect_tables::<Postgres, _>(&mut *conn, statement, statement, &mut tables).await?;
            }
        } else {
            let query = bind_params(sqlx::query(sql), params);
            collect_tables::<Postgres, _>(&mut *conn, sql, query, &mut tables).await?;
        }
        Ok(tables)
    }
}

mod sqlite {
    use super::*;
    use sqlx::Sqlite;
    use sqlx::sqlite::SqliteConnection;

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .execute(&mut *conn)
                .await?
        };
        Ok(result.rows_affected())
    }

    pub async fn scalar(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Scalar> {
        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            bind_params(sqlx::query(sql), params)
                .fetch_optional(&mut *conn)
                .await?
        };
        Ok(first_column(row))
    }

    pub async fn tables(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DataTable>> {
        let mut tables = Vec::new();
        if params.is_empty() {
            for statement in split_statements(sql, DatabaseType::SQLite) {
                collect_tables::<Sqlite, _>(&mut *conn, statement, statement, &mut tables).await?;
            }
        } else {
            let query = bind_params(sqlx::query(sql), params);
            collect_tables::<Sqlite, _>(&mut *conn, sql, query, &mut tables).await?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::DbConnection;
    use crate::models::DatabaseType;
    use serde_json::json;

    async fn memory() -> DbConnection {
        DbConnection::connect(DatabaseType::SQLite, "sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_yields_one_table_per_row_set() {
        let mut conn = memory().await;
        let outcome = run(
            conn.as_connection_ref(),
            "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2); SELECT id FROM t; SELECT 'x' AS tag",
            &[],
            Operation::Tables,
        )
        .await
        .unwrap();

        let tables = outcome.into_tables().unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].row_count(), 2);
        assert_eq!(tables[0].value(1, "id"), Some(&json!(2)));
        assert_eq!(tables[1].value(0, "tag"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_empty_result_keeps_its_table_slot() {
        let mut conn = memory().await;
        let tables = run(
            conn.as_connection_ref(),
            "CREATE TABLE empty_t (a INTEGER, b TEXT);
             CREATE TABLE t (b INTEGER);
             INSERT INTO t VALUES (5);
             SELECT a, b FROM empty_t;
             SELECT b FROM t;",
            &[],
            Operation::Tables,
        )
        .await
        .unwrap()
        .into_tables()
        .unwrap();

        assert_eq!(tables.len(), 2);
        let names: Vec<&str> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(tables[0].row_count(), 0);
        assert_eq!(tables[1].value(0, "b"), Some(&json!(5)));

        let prepared = run(
            conn.as_connection_ref(),
            "SELECT a FROM empty_t WHERE a = ?",
            &[QueryParam::Int(1)],
            Operation::Tables,
        )
        .await
        .unwrap()
        .into_tables()
        .unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].columns[0].name, "a");
        assert!(prepared[0].rows.is_empty());
    }

    #[tokio::test]
    async fn test_scalar_no_rows_vs_null() {
        let mut conn = memory().await;
        run(
            conn.as_connection_ref(),
            "CREATE TABLE t (v TEXT)",
            &[],
            Operation::NonQuery,
        )
        .await
        .unwrap();

        let empty = run(conn.as_connection_ref(), "SELECT v FROM t", &[], Operation::Scalar)
            .await
            .unwrap()
            .into_scalar()
            .unwrap();
        assert_eq!(empty, Scalar::NoRows);

        let null = run(conn.as_connection_ref(), "SELECT NULL", &[], Operation::Scalar)
            .await
            .unwrap()
            .into_scalar()
            .unwrap();
        assert_eq!(null, Scalar::Value(serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_parameterized_non_query() {
        let mut conn = memory().await;
        run(
            conn.as_connection_ref(),
            "CREATE TABLE t (id INTEGER, name TEXT)",
            &[],
            Operation::NonQuery,
        )
        .await
        .unwrap();

        let affected = run(
            conn.as_connection_ref(),
            "INSERT INTO t (id, name) VALUES (?, ?)",
            &[QueryParam::Int(7), QueryParam::String("seven".into())],
            Operation::NonQuery,
        )
        .await
        .unwrap()
        .into_rows_affected()
        .unwrap();
        assert_eq!(affected, 1);
    }

    #[test]
    fn test_outcome_mismatch_is_internal() {
        let err = Outcome::RowsAffected(1).into_scalar().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
