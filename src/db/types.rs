//! Row to JSON mapping.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies a column type name into a logical category
//! 2. Database-specific decoders extract the value for that category
//!
//! SQLite is dynamically typed, so its decoder classifies by the storage
//! class of each value and only consults the declared type for hints.

use crate::models::{ColumnMetadata, DataTable, DatabaseType};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // MySQL reports BOOLEAN columns as TINYINT(1), which sqlx names BOOLEAN
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower == "interval" || lower.contains("point") {
        return TypeCategory::Unknown;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower.starts_with("time")
    {
        return TypeCategory::Temporal;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Encode binary data as a base64 JSON string.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON.
pub trait RowToJson: Row {
    /// Decode a single column. SQL NULL and undecodable values become `null`.
    fn column_value(&self, idx: usize) -> JsonValue;

    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .map(|col| (col.name().to_string(), self.column_value(col.ordinal())))
            .collect()
    }

    /// Column names and types. `nullable` starts out false; [`rows_to_table`]
    /// sets it when a NULL was actually observed.
    fn get_column_metadata(&self) -> Vec<ColumnMetadata> {
        columns_to_table(self.columns()).columns
    }
}

/// Table with these columns and no rows.
pub fn columns_to_table<C: Column>(columns: &[C]) -> DataTable {
    DataTable {
        columns: columns
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), col.type_info().name(), false))
            .collect(),
        rows: Vec::new(),
    }
}

/// Build a table from the rows of one result set.
pub fn rows_to_table<R: RowToJson>(rows: &[R]) -> DataTable {
    let mut columns = rows
        .first()
        .map(|r| r.get_column_metadata())
        .unwrap_or_default();
    let rows: Vec<serde_json::Map<String, JsonValue>> =
        rows.iter().map(|r| r.to_json_map()).collect();

    for column in &mut columns {
        column.nullable = rows
            .iter()
            .any(|r| r.get(&column.name).is_some_and(JsonValue::is_null));
    }

    DataTable { columns, rows }
}

fn is_null_at<R: Row>(row: &R, idx: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

impl RowToJson for MySqlRow {
    fn column_value(&self, idx: usize) -> JsonValue {
        if is_null_at(self, idx) {
            return JsonValue::Null;
        }
        let type_name = self.columns()[idx].type_info().name();
        mysql::decode_column(self, idx, categorize_type(type_name, DatabaseType::MySQL))
    }
}

impl RowToJson for PgRow {
    fn column_value(&self, idx: usize) -> JsonValue {
        if is_null_at(self, idx) {
            return JsonValue::Null;
        }
        let type_name = self.columns()[idx].type_info().name();
        postgres::decode_column(self, idx, categorize_type(type_name, DatabaseType::PostgreSQL))
    }
}

impl RowToJson for SqliteRow {
    fn column_value(&self, idx: usize) -> JsonValue {
        let storage_class = match self.try_get_raw(idx) {
            Ok(value) if value.is_null() => return JsonValue::Null,
            Ok(value) => value.type_info().name().to_string(),
            Err(_) => return JsonValue::Null,
        };
        let declared = categorize_type(self.columns()[idx].type_info().name(), DatabaseType::SQLite);
        sqlite::decode_column(self, idx, &storage_class, declared)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use sqlx::types::Decimal;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or_else(|_| decode_integer(row, idx)),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_bytes(row, idx),
            TypeCategory::Json => row
                .try_get::<JsonValue, _>(idx)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Decimal, _>(idx) {
            Ok(v) => JsonValue::String(v.to_string()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode DECIMAL");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        row.try_get::<f32, _>(idx)
            .map(|v| float_value(v as f64))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_bytes(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<String, _>(idx) {
            Ok(v) => JsonValue::String(v),
            // VARBINARY and binary-collated text
            Err(_) => decode_bytes(row, idx),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::types::{Decimal, Uuid};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<JsonValue, _>(idx)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => row
                .try_get::<Uuid, _>(idx)
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => row
                .try_get::<String, _>(idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Decimal, _>(idx) {
            Ok(v) => JsonValue::String(v.to_string()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode NUMERIC");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        row.try_get::<f32, _>(idx)
            .map(|v| float_value(v as f64))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> JsonValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        storage_class: &str,
        declared: TypeCategory,
    ) -> JsonValue {
        match storage_class {
            "INTEGER" if declared == TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            "INTEGER" => row
                .try_get::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" => row
                .try_get::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx, declared),
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        match row.try_get::<String, _>(idx) {
            Ok(v) if declared == TypeCategory::Json => {
                serde_json::from_str(&v).unwrap_or(JsonValue::String(v))
            }
            Ok(v) => JsonValue::String(v),
            Err(_) => JsonValue::Null,
        }
    }
}
