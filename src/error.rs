//! Error types for the database helper.
//!
//! Every fallible operation returns [`DbError`]. Variants are grouped into a
//! small set of [`ErrorKind`]s so callers can branch on the category without
//! matching every variant.

use thiserror::Error;

/// Boxed cause attached to configuration failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A connection string could not be registered.
    Configuration,
    /// An alias was never registered (or has been removed).
    NotFound,
    /// The call was made in a state where it cannot succeed.
    InvalidOperation,
    /// Error reported by the database driver, passed through unchanged.
    Driver,
    /// Bug or unexpected condition inside this crate.
    Internal,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error for alias '{alias}': {message}")]
    Configuration {
        alias: String,
        message: String,
        suggestion: String,
        #[source]
        source: BoxError,
    },

    #[error("Connection alias not found: {alias}")]
    AliasNotFound { alias: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Transaction on alias '{alias}' could not be opened: {source}")]
    TransactionNotReady {
        alias: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Database error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error with a helpful suggestion.
    pub fn configuration(
        alias: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Configuration {
            alias: alias.into(),
            message: message.into(),
            suggestion: suggestion.into(),
            source: source.into(),
        }
    }

    /// Create an alias not found error.
    pub fn alias_not_found(alias: impl Into<String>) -> Self {
        Self::AliasNotFound {
            alias: alias.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wrap the failure that kept a transaction from becoming ready.
    pub fn transaction_not_ready(alias: impl Into<String>, source: DbError) -> Self {
        Self::TransactionNotReady {
            alias: alias.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::AliasNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidOperation { .. } | Self::TransactionNotReady { .. } => {
                ErrorKind::InvalidOperation
            }
            Self::Driver(_) => ErrorKind::Driver,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration { suggestion, .. } => Some(suggestion),
            Self::AliasNotFound { .. } => {
                Some("Register the alias before using it, or check its spelling")
            }
            Self::TransactionNotReady { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// SQLSTATE (or vendor code) reported by the server, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            Self::Driver(sqlx::Error::Database(db_err)) => db_err.code().map(|c| c.to_string()),
            Self::TransactionNotReady { source, .. } => source.sql_state(),
            _ => None,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DbError::alias_not_found("reporting");
        assert_eq!(err.to_string(), "Connection alias not found: reporting");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DbError::alias_not_found("x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DbError::invalid_operation("nope").kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(DbError::internal("bug").kind(), ErrorKind::Internal);
        assert_eq!(
            DbError::from(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Driver
        );
    }

    #[test]
    fn test_transaction_not_ready_is_invalid_operation() {
        let err = DbError::transaction_not_ready("DEFAULT", DbError::alias_not_found("DEFAULT"));
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        let source = err.source().expect("cause is kept");
        assert!(source.to_string().contains("DEFAULT"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_configuration_error_carries_cause() {
        let err = DbError::configuration(
            "main",
            "Connection string is invalid",
            "Check the URL format",
            "relative URL without a base",
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.suggestion(), Some("Check the URL format"));
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("relative URL without a base".to_string())
        );
    }

    #[test]
    fn test_sql_state_absent_for_non_driver_errors() {
        assert_eq!(DbError::invalid_operation("x").sql_state(), None);
        assert_eq!(DbError::from(sqlx::Error::RowNotFound).sql_state(), None);
    }
}
