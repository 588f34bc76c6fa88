//! Database dispatch macros for reducing code duplication.
//!
//! The executor keeps one linear implementation per backend; these macros
//! generate the match that routes a borrowed connection to the right one.

/// Macro for generating connection dispatch match arms.
///
/// This macro generates match arms for `ConnectionRef` variants, reducing the
/// need to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// dispatch_connection!(conn, {
///     MySql(c) => mysql::execute(c, sql, params).await,
///     Postgres(c) => postgres::execute(c, sql, params).await,
///     SQLite(c) => sqlite::execute(c, sql, params).await,
/// });
/// ```
macro_rules! dispatch_connection {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::ConnectionRef::$variant($c) => $body,
            )+
        }
    };
}

pub(crate) use dispatch_connection;
