//! Data models shared by the registry, transactions and the facade.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionDescriptor, DatabaseType, IsolationLevel, ServerVersion, TransactionState,
    mask_connection_string,
};
pub use query::{ColumnMetadata, Command, CommandKind, DataSet, DataTable, QueryParam, Scalar};
