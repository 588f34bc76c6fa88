//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection alias registry
//! - Single connections for ad hoc commands
//! - Scoped transactions on dedicated connections
//! - Command execution, statement splitting and type mappings
//! - Database dispatch macros for reducing code duplication

pub mod connection;
pub(crate) mod executor;
pub(crate) mod macros;
pub mod registry;
pub(crate) mod script;
pub mod transaction;
pub mod types;

pub use connection::DbConnection;
pub use registry::{ConnectionRegistry, DEFAULT_ALIAS};
pub use transaction::ScopedTransaction;
