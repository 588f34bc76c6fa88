//! Facade operations.
//!
//! `DbHelper` runs a command either on a fresh connection for a registered
//! alias or inside a caller-owned [`ScopedTransaction`], and returns the
//! result in one of four shapes: rows affected, a scalar, the first table or
//! every table.

use crate::db::connection::DbConnection;
use crate::db::executor::{self, Operation, Outcome};
use crate::db::registry::{ConnectionRegistry, DEFAULT_ALIAS};
use crate::db::transaction::ScopedTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{Command, ConnectionDescriptor, DataSet, DataTable, IsolationLevel, Scalar};
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

/// Where a command runs.
#[derive(Debug)]
pub enum Target<'a> {
    /// A fresh connection for this alias, closed after the command.
    Alias(&'a str),
    /// An open transaction. `None` stands for a transaction the caller
    /// expected to have but does not, and is rejected.
    Transaction(Option<&'a mut ScopedTransaction>),
}

impl Default for Target<'_> {
    fn default() -> Self {
        Self::Alias(DEFAULT_ALIAS)
    }
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(alias: &'a str) -> Self {
        Self::Alias(alias)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(alias: &'a String) -> Self {
        Self::Alias(alias.as_str())
    }
}

impl<'a> From<&'a mut ScopedTransaction> for Target<'a> {
    fn from(tx: &'a mut ScopedTransaction) -> Self {
        Self::Transaction(Some(tx))
    }
}

impl<'a> From<Option<&'a mut ScopedTransaction>> for Target<'a> {
    fn from(tx: Option<&'a mut ScopedTransaction>) -> Self {
        Self::Transaction(tx)
    }
}

/// Entry point for registering connections and running commands.
///
/// Cloning is cheap; clones share the registry.
#[derive(Debug, Clone)]
pub struct DbHelper {
    registry: ConnectionRegistry,
}

impl DbHelper {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Get the registry this helper resolves aliases against.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Validate and register a connection string under `alias`.
    pub async fn register_connection(
        &self,
        alias: &str,
        connection_string: &str,
    ) -> DbResult<ConnectionDescriptor> {
        self.registry.register(alias, connection_string).await
    }

    /// Remove an alias. Returns whether it was registered.
    pub async fn remove_connection(&self, alias: &str) -> bool {
        self.registry.remove(alias).await
    }

    /// Open a scoped transaction on `alias`.
    pub async fn open_transaction(
        &self,
        isolation_level: IsolationLevel,
        alias: &str,
    ) -> DbResult<ScopedTransaction> {
        ScopedTransaction::begin(&self.registry, isolation_level, alias).await
    }

    /// Open a scoped transaction on the `DEFAULT` alias.
    pub async fn open_default_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> DbResult<ScopedTransaction> {
        self.open_transaction(isolation_level, DEFAULT_ALIAS).await
    }

    /// Run a command and return the number of rows it affected.
    pub async fn execute_non_query<'a>(
        &self,
        command: &Command,
        target: impl Into<Target<'a>>,
    ) -> DbResult<u64> {
        self.run(command, target.into(), Operation::NonQuery)
            .await?
            .into_rows_affected()
    }

    /// Run a command and return the first column of its first row.
    pub async fn execute_scalar<'a>(
        &self,
        command: &Command,
        target: impl Into<Target<'a>>,
    ) -> DbResult<Scalar> {
        self.run(command, target.into(), Operation::Scalar)
            .await?
            .into_scalar()
    }

    /// Run a command and return its first table, or `None` when no statement
    /// returns result columns.
    pub async fn execute_data_table<'a>(
        &self,
        command: &Command,
        target: impl Into<Target<'a>>,
    ) -> DbResult<Option<DataTable>> {
        let tables = self
            .run(command, target.into(), Operation::Tables)
            .await?
            .into_tables()?;
        Ok(tables.into_iter().next())
    }

    /// Run a command and return every table it produced, in order.
    pub async fn execute_data_set<'a>(
        &self,
        command: &Command,
        target: impl Into<Target<'a>>,
    ) -> DbResult<DataSet> {
        let tables = self
            .run(command, target.into(), Operation::Tables)
            .await?
            .into_tables()?;
        Ok(DataSet { tables })
    }

    /// Open a transaction, run `f` in it and close it.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise.
    /// Values used inside the closure must be owned by it:
    ///
    /// ```ignore
    /// let h = helper.clone();
    /// let total = helper
    ///     .run_in_transaction(IsolationLevel::ReadCommitted, "main", move |tx| {
    ///         Box::pin(async move {
    ///             h.execute_non_query(&Command::text("UPDATE stock SET n = n - 1"), &mut *tx).await?;
    ///             h.execute_scalar(&Command::text("SELECT SUM(n) FROM stock"), tx).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_in_transaction<T, F>(
        &self,
        isolation_level: IsolationLevel,
        alias: &str,
        f: F,
    ) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut ScopedTransaction) -> BoxFuture<'t, DbResult<T>>,
    {
        let mut tx = self.open_transaction(isolation_level, alias).await?;

        match f(&mut tx).await {
            Ok(value) => {
                if tx.state().is_active() {
                    tx.mark_success()?;
                }
                tx.close().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close_err) = tx.close().await {
                    warn!(
                        transaction_id = %tx.id(),
                        error = %close_err,
                        "Rollback after failed unit of work also failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        command: &Command,
        target: Target<'_>,
        operation: Operation,
    ) -> DbResult<Outcome> {
        match target {
            Target::Transaction(None) => Err(DbError::invalid_operation(
                "The specified transaction is missing",
            )),
            Target::Transaction(Some(tx)) => {
                let sql = command.sql_for(tx.db_type())?;
                debug!(transaction_id = %tx.id(), "Running command in transaction");
                let conn = tx.connection()?;
                executor::run(conn, &sql, &command.params, operation).await
            }
            Target::Alias(alias) => {
                let descriptor = self.registry.descriptor(alias).await?;
                let sql = command.sql_for(descriptor.db_type)?;

                let mut conn = DbConnection::open(&descriptor).await?;
                let result =
                    executor::run(conn.as_connection_ref(), &sql, &command.params, operation).await;

                if let Err(e) = conn.close().await {
                    warn!(alias = %alias, error = %e, "Failed to close connection");
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn helper() -> DbHelper {
        DbHelper::new(ConnectionRegistry::new())
    }

    #[test]
    fn test_target_conversions() {
        assert!(matches!(Target::default(), Target::Alias("DEFAULT")));
        assert!(matches!(Target::from("reporting"), Target::Alias("reporting")));
        let owned = String::from("audit");
        assert!(matches!(Target::from(&owned), Target::Alias("audit")));
        assert!(matches!(
            Target::from(None::<&mut ScopedTransaction>),
            Target::Transaction(None)
        ));
    }

    #[tokio::test]
    async fn test_missing_transaction_is_invalid_operation() {
        let err = helper()
            .execute_non_query(&Command::text("SELECT 1"), None::<&mut ScopedTransaction>)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[tokio::test]
    async fn test_unknown_alias_is_not_found() {
        let err = helper()
            .execute_scalar(&Command::text("SELECT 1"), "nowhere")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_helper_shares_the_callers_registry() {
        let registry = ConnectionRegistry::new();
        let helper = DbHelper::new(registry.clone());

        registry.register("mem", "sqlite::memory:").await.unwrap();
        assert!(helper.registry().contains("mem").await);

        assert!(helper.remove_connection("mem").await);
        assert!(!registry.contains("mem").await);
    }

    #[tokio::test]
    async fn test_in_memory_scalar() {
        let helper = helper();
        helper
            .register_connection("mem", "sqlite::memory:")
            .await
            .unwrap();
        let scalar = helper
            .execute_scalar(&Command::text("SELECT 40 + ?").bind(2), "mem")
            .await
            .unwrap();
        assert_eq!(scalar.as_i64(), Some(42));
    }
}
