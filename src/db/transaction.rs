//! Scoped transactions.
//!
//! A `ScopedTransaction` owns one dedicated connection with an open database
//! transaction at a chosen isolation level. It is rolled back unless the
//! caller marks it successful before closing it, and the connection is
//! released when it is closed or dropped.

use crate::db::connection::ConnectionRef;
use crate::db::registry::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionDescriptor, DatabaseType, IsolationLevel, TransactionState};
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::pool::PoolOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{
    Connection, Database, Executor, MySql, MySqlPool, PgPool, Pool, Postgres, Sqlite, SqlitePool,
    Transaction,
};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(tx) => tx.commit().await,
            Self::Postgres(tx) => tx.commit().await,
            Self::SQLite(tx) => tx.commit().await,
        }
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(tx) => tx.rollback().await,
            Self::Postgres(tx) => tx.rollback().await,
            Self::SQLite(tx) => tx.rollback().await,
        }
    }

    fn connection(&mut self) -> ConnectionRef<'_> {
        match self {
            Self::MySql(tx) => ConnectionRef::MySql(&mut **tx),
            Self::Postgres(tx) => ConnectionRef::Postgres(&mut **tx),
            Self::SQLite(tx) => ConnectionRef::SQLite(&mut **tx),
        }
    }
}

/// Single-connection pool owned by one transaction.
enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    async fn close(&self) {
        match self {
            Self::MySql(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
            Self::SQLite(pool) => pool.close().await,
        }
    }
}

/// The live parts of a transaction. Present exactly while it is active.
struct TransactionHandle {
    transaction: DbTransaction,
    pool: DbPool,
}

impl TransactionHandle {
    async fn open(
        descriptor: &ConnectionDescriptor,
        isolation_level: IsolationLevel,
    ) -> Result<Self, sqlx::Error> {
        let statement = isolation_level.session_statement(descriptor.db_type);
        let connection_string = descriptor.connection_string.as_str();

        Ok(match descriptor.db_type {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::from_str(connection_string)?;
                let (pool, tx) = begin_dedicated::<MySql>(options, statement).await?;
                Self {
                    transaction: DbTransaction::MySql(tx),
                    pool: DbPool::MySql(pool),
                }
            }
            DatabaseType::PostgreSQL => {
                let options = PgConnectOptions::from_str(connection_string)?;
                let (pool, tx) = begin_dedicated::<Postgres>(options, statement).await?;
                Self {
                    transaction: DbTransaction::Postgres(tx),
                    pool: DbPool::Postgres(pool),
                }
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(connection_string)?;
                let (pool, tx) = begin_dedicated::<Sqlite>(options, statement).await?;
                Self {
                    transaction: DbTransaction::SQLite(tx),
                    pool: DbPool::SQLite(pool),
                }
            }
        })
    }
}

/// Open a one-connection pool whose connection runs `statement` before use,
/// then begin a transaction on it.
async fn begin_dedicated<DB>(
    options: <DB::Connection as Connection>::Options,
    statement: &'static str,
) -> Result<(Pool<DB>, Transaction<'static, DB>), sqlx::Error>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    let pool = PoolOptions::<DB>::new()
        .min_connections(0)
        .max_connections(1)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(statement).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    match pool.begin().await {
        Ok(tx) => Ok((pool, tx)),
        Err(e) => {
            pool.close().await;
            Err(e)
        }
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// A database transaction bound to a registered alias.
///
/// Call [`mark_success`](Self::mark_success) when the work is complete and
/// [`close`](Self::close) to end it:
///
/// ```ignore
/// let mut tx = helper.open_transaction(IsolationLevel::RepeatableRead, "main").await?;
/// helper.execute_non_query(&Command::text("DELETE FROM jobs"), &mut tx).await?;
/// tx.mark_success()?;
/// tx.close().await?;
/// ```
///
/// A transaction that is dropped without `close` is rolled back.
pub struct ScopedTransaction {
    id: String,
    alias: String,
    isolation_level: IsolationLevel,
    db_type: DatabaseType,
    started_at: DateTime<Utc>,
    state: TransactionState,
    success: bool,
    handle: Option<TransactionHandle>,
}

impl ScopedTransaction {
    /// Open a connection for `alias`, apply `isolation_level` and begin.
    ///
    /// Any failure, including an unknown alias, is reported as
    /// [`DbError::TransactionNotReady`] with the cause attached. Nothing
    /// stays open on failure.
    pub async fn begin(
        registry: &ConnectionRegistry,
        isolation_level: IsolationLevel,
        alias: &str,
    ) -> DbResult<Self> {
        let ready = async {
            let descriptor = registry.descriptor(alias).await?;
            let handle = TransactionHandle::open(&descriptor, isolation_level).await?;
            Ok::<_, DbError>((descriptor.db_type, handle))
        }
        .await;

        let (db_type, handle) = match ready {
            Ok(ready) => ready,
            Err(e) => {
                warn!(
                    alias = %alias,
                    isolation_level = %isolation_level,
                    error = %e,
                    "Transaction could not be opened"
                );
                return Err(DbError::transaction_not_ready(alias, e));
            }
        };

        let tx = Self {
            id: generate_transaction_id(),
            alias: alias.to_string(),
            isolation_level,
            db_type,
            started_at: Utc::now(),
            state: TransactionState::Active,
            success: false,
            handle: Some(handle),
        };

        info!(
            transaction_id = %tx.id,
            alias = %tx.alias,
            db_type = %tx.db_type,
            isolation_level = %tx.isolation_level,
            "Transaction started"
        );

        Ok(tx)
    }

    /// Record that the work succeeded, so `close` commits.
    pub fn mark_success(&mut self) -> DbResult<()> {
        if self.state.is_ended() {
            return Err(DbError::invalid_operation(format!(
                "Transaction {} has already ended",
                self.id
            )));
        }
        self.success = true;
        Ok(())
    }

    /// End the transaction and release its connection.
    ///
    /// Commits if success was marked, rolls back otherwise. The connection is
    /// closed either way, and a commit or rollback error is returned after
    /// that. Closing an ended transaction does nothing.
    pub async fn close(&mut self) -> DbResult<()> {
        let Some(TransactionHandle { transaction, pool }) = self.handle.take() else {
            return Ok(());
        };

        let result = if self.success {
            transaction.commit().await
        } else {
            transaction.rollback().await
        };
        pool.close().await;

        self.state = match (&result, self.success) {
            (Ok(()), true) => TransactionState::Committed,
            (Ok(()), false) => TransactionState::RolledBack,
            (Err(_), _) => TransactionState::Failed,
        };

        match &result {
            Ok(()) => info!(
                transaction_id = %self.id,
                alias = %self.alias,
                state = ?self.state,
                duration_ms = (Utc::now() - self.started_at).num_milliseconds(),
                "Transaction closed"
            ),
            Err(e) => warn!(
                transaction_id = %self.id,
                alias = %self.alias,
                committing = self.success,
                error = %e,
                "Transaction failed to end cleanly; connection released"
            ),
        }

        result.map_err(DbError::from)
    }

    /// Borrow the transaction's connection for one command.
    pub(crate) fn connection(&mut self) -> DbResult<ConnectionRef<'_>> {
        match self.handle.as_mut() {
            Some(handle) => Ok(handle.transaction.connection()),
            None => Err(DbError::invalid_operation(format!(
                "Transaction {} has already ended",
                self.id
            ))),
        }
    }

    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the alias this transaction was opened on.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether `close` would commit.
    pub fn is_success_marked(&self) -> bool {
        self.success
    }
}

impl std::fmt::Debug for ScopedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("isolation_level", &self.isolation_level)
            .field("db_type", &self.db_type)
            .field("state", &self.state)
            .field("success", &self.success)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for ScopedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} on '{}' ({}, {})",
            self.id, self.alias, self.isolation_level, self.db_type
        )
    }
}

impl Drop for ScopedTransaction {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let transaction_id = self.id.clone();
        let alias = self.alias.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let TransactionHandle { transaction, pool } = handle;
                    if let Err(e) = transaction.rollback().await {
                        debug!(transaction_id = %transaction_id, error = %e, "Rollback on drop failed");
                    }
                    pool.close().await;
                    warn!(
                        transaction_id = %transaction_id,
                        alias = %alias,
                        "Transaction rolled back via Drop - consider explicit close()"
                    );
                });
            }
            Err(_) => {
                // sqlx rolls back on drop and the server aborts on disconnect
                warn!(
                    transaction_id = %transaction_id,
                    alias = %alias,
                    "Transaction dropped outside a runtime without close()"
                );
                drop(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_generate_transaction_id() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
        assert_ne!(id, generate_transaction_id());
    }

    #[tokio::test]
    async fn test_begin_on_unknown_alias_is_not_ready() {
        let registry = ConnectionRegistry::new();
        let err = ScopedTransaction::begin(&registry, IsolationLevel::ReadCommitted, "missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert!(matches!(
            err,
            DbError::TransactionNotReady { ref source, .. }
                if source.kind() == ErrorKind::NotFound
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_in_memory() {
        let registry = ConnectionRegistry::new();
        registry.register("mem", "sqlite::memory:").await.unwrap();

        let mut tx = ScopedTransaction::begin(&registry, IsolationLevel::Serializable, "mem")
            .await
            .unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        assert_eq!(tx.db_type(), DatabaseType::SQLite);
        assert!(tx.to_string().contains("'mem'"));
        assert!(tx.connection().is_ok());

        tx.mark_success().unwrap();
        tx.close().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);

        // second close is a no-op
        tx.close().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);

        assert_eq!(
            tx.mark_success().unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert!(tx.connection().is_err());
    }
}
