//! Command and result data models.
//!
//! This module defines the command sent to the database (text or stored
//! procedure plus positional parameters) and the shapes results come back in.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::borrow::Cow;

/// A parameter value for parameterized commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// JSON document (bound as TEXT on SQLite)
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Scalars map onto their natural variant; arrays and objects stay JSON.
impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Json(JsonValue::Number(n))),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Plain SQL.
    #[default]
    Text,
    /// Name of a stored procedure; parameters become its arguments.
    StoredProcedure,
}

/// A command to run against a connection or transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub params: Vec<QueryParam>,
    pub kind: CommandKind,
}

impl Command {
    /// Create a plain SQL command.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            params: Vec::new(),
            kind: CommandKind::Text,
        }
    }

    /// Create a stored procedure call.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            params: Vec::new(),
            kind: CommandKind::StoredProcedure,
        }
    }

    /// Add a positional parameter.
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Replace all parameters.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the command kind.
    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Render the SQL actually sent to the given backend.
    pub fn sql_for(&self, db_type: DatabaseType) -> DbResult<Cow<'_, str>> {
        match self.kind {
            CommandKind::Text => Ok(Cow::Borrowed(self.text.as_str())),
            CommandKind::StoredProcedure => {
                let name = self.text.trim();
                if !is_procedure_name(name) {
                    return Err(DbError::invalid_operation(format!(
                        "'{}' is not a valid stored procedure name",
                        self.text
                    )));
                }
                let placeholders: Vec<String> = match db_type {
                    DatabaseType::MySQL => vec!["?".to_string(); self.params.len()],
                    DatabaseType::PostgreSQL => {
                        (1..=self.params.len()).map(|i| format!("${i}")).collect()
                    }
                    DatabaseType::SQLite => {
                        return Err(DbError::invalid_operation(
                            "SQLite does not support stored procedures",
                        ));
                    }
                };
                Ok(Cow::Owned(format!(
                    "CALL {}({})",
                    name,
                    placeholders.join(", ")
                )))
            }
        }
    }
}

fn is_procedure_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$'))
}

/// Result of a scalar query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    /// First column of the first row (may be JSON `null` for SQL NULL).
    Value(JsonValue),
    /// The command produced no rows.
    NoRows,
}

impl Scalar {
    /// The value, or `None` when no row came back.
    pub fn value(&self) -> Option<&JsonValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::NoRows => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        self.value().and_then(|v| match v {
            JsonValue::Number(n) => n.as_i64(),
            // DECIMAL values come back as exact strings
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(JsonValue::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// One tabular result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTable {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
}

impl DataTable {
    /// Get the number of rows in the table.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Value at `row`/`column`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&JsonValue> {
        self.rows.get(row).and_then(|r| r.get(column))
    }
}

/// Every tabular result a command produced, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

impl DataSet {
    /// First table, if any.
    pub fn first_table(&self) -> Option<&DataTable> {
        self.tables.first()
    }

    /// Consume the set and keep only the first table.
    pub fn into_first_table(self) -> Option<DataTable> {
        self.tables.into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(7)), QueryParam::Int(7));
    }

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from(json!(null)), QueryParam::Null);
        assert_eq!(QueryParam::from(json!(12)), QueryParam::Int(12));
        assert_eq!(QueryParam::from(json!(1.5)), QueryParam::Float(1.5));
        assert_eq!(
            QueryParam::from(json!("abc")),
            QueryParam::String("abc".to_string())
        );
        assert_eq!(
            QueryParam::from(json!({"a": 1})),
            QueryParam::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_text_command_passes_through() {
        let cmd = Command::text("SELECT 1").bind(5);
        assert_eq!(cmd.sql_for(DatabaseType::SQLite).unwrap(), "SELECT 1");
        assert_eq!(cmd.params, vec![QueryParam::Int(5)]);
    }

    #[test]
    fn test_procedure_call_rendering() {
        let cmd = Command::procedure("billing.close_month").bind(2024).bind("eu");
        assert_eq!(
            cmd.sql_for(DatabaseType::MySQL).unwrap(),
            "CALL billing.close_month(?, ?)"
        );
        assert_eq!(
            cmd.sql_for(DatabaseType::PostgreSQL).unwrap(),
            "CALL billing.close_month($1, $2)"
        );
        assert_eq!(
            Command::procedure("refresh").sql_for(DatabaseType::MySQL).unwrap(),
            "CALL refresh()"
        );
    }

    #[test]
    fn test_procedure_rejected_on_sqlite() {
        let err = Command::procedure("refresh")
            .sql_for(DatabaseType::SQLite)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_procedure_name_validation() {
        let cmd = Command::procedure("x(); DROP TABLE users; --");
        assert!(cmd.sql_for(DatabaseType::MySQL).is_err());
        assert!(Command::procedure("").sql_for(DatabaseType::MySQL).is_err());
        assert!(Command::procedure("a.").sql_for(DatabaseType::MySQL).is_err());
    }

    #[test]
    fn test_scalar_views() {
        assert_eq!(Scalar::Value(json!(3)).as_i64(), Some(3));
        assert_eq!(Scalar::Value(json!("12.00")).as_i64(), None);
        assert_eq!(Scalar::Value(json!("12")).as_i64(), Some(12));
        assert_eq!(Scalar::Value(json!("x")).as_str(), Some("x"));
        assert_eq!(Scalar::NoRows.value(), None);
    }

    #[test]
    fn test_data_set_first_table() {
        let empty = DataSet::default();
        assert!(empty.is_empty());
        assert!(empty.into_first_table().is_none());

        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), json!(1));
        let table = DataTable {
            columns: vec![ColumnMetadata::new("id", "INTEGER", false)],
            rows: vec![row],
        };
        let set = DataSet {
            tables: vec![table.clone(), DataTable::default()],
        };
        assert_eq!(set.first_table(), Some(&table));
        assert_eq!(set.first_table().unwrap().value(0, "id"), Some(&json!(1)));
    }
}
