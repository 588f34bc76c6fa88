//! Alias-based database helper.
//!
//! Register connection strings under short aliases, run commands against an
//! alias or inside a scoped transaction, and get results back as rows
//! affected, a scalar, a table or a set of tables. Works with SQLite,
//! PostgreSQL and MySQL through sqlx.
//!
//! ```ignore
//! let helper = DbHelper::new(ConnectionRegistry::new());
//! helper.register_connection("DEFAULT", "sqlite:app.db").await?;
//!
//! let mut tx = helper.open_default_transaction(IsolationLevel::ReadCommitted).await?;
//! helper
//!     .execute_non_query(&Command::text("INSERT INTO users (name) VALUES (?)").bind("ada"), &mut tx)
//!     .await?;
//! tx.mark_success()?;
//! tx.close().await?;
//!
//! let count = helper
//!     .execute_scalar(&Command::text("SELECT COUNT(*) FROM users"), Target::default())
//!     .await?;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod helper;
pub mod models;

pub use config::Config;
pub use db::{ConnectionRegistry, DEFAULT_ALIAS, DbConnection, ScopedTransaction};
pub use error::{DbError, DbResult, ErrorKind};
pub use helper::{DbHelper, Target};
pub use models::{
    ColumnMetadata, Command, CommandKind, ConnectionDescriptor, DataSet, DataTable, DatabaseType,
    IsolationLevel, QueryParam, Scalar, ServerVersion, TransactionState,
};
