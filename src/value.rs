//! Values exchanged with the database.
//!
//! `Value` is used both for bound query arguments and for decoded attribute
//! tags. Every variant keeps the width of the column it came from so the tile
//! encoder can pick a matching MVT value type.

use std::fmt;

use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{BigDecimal, Uuid};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Arbitrary precision NUMERIC, kept exact.
    Numeric(BigDecimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Numeric(_) => "numeric",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Uuid(_) => "uuid",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Int16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::Numeric(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A feature identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FeatureId {
    Int(i64),
    Text(String),
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Int(id) => write!(f, "{}", id),
            FeatureId::Text(id) => f.write_str(id),
        }
    }
}

/// The column types this crate knows how to handle, keyed off the driver's
/// type name. Anything else ends up as `Unsupported` and is rejected when it
/// appears as a tag column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    HStore,
    Geometry,
    Unsupported(String),
}

/// Coarse grouping of [`ColumnType`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnCategory {
    Numeric,
    Text,
    Temporal,
    KeyValue,
    Binary,
    Unsupported,
}

impl ColumnType {
    /// Classifies a PostgreSQL type name (as reported by the driver).
    pub fn from_type_name(name: &str) -> ColumnType {
        match name.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => ColumnType::Bool,
            "INT2" | "SMALLINT" => ColumnType::Int2,
            "INT4" | "INT" | "INTEGER" => ColumnType::Int4,
            "INT8" | "BIGINT" => ColumnType::Int8,
            "FLOAT4" | "REAL" => ColumnType::Float4,
            "FLOAT8" | "DOUBLE PRECISION" => ColumnType::Float8,
            "NUMERIC" | "DECIMAL" => ColumnType::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => ColumnType::Text,
            "BYTEA" => ColumnType::Bytea,
            "DATE" => ColumnType::Date,
            "TIME" => ColumnType::Time,
            "TIMESTAMP" => ColumnType::Timestamp,
            "TIMESTAMPTZ" => ColumnType::TimestampTz,
            "UUID" => ColumnType::Uuid,
            "HSTORE" => ColumnType::HStore,
            "GEOMETRY" | "GEOGRAPHY" => ColumnType::Geometry,
            _ => ColumnType::Unsupported(name.to_owned()),
        }
    }

    pub fn category(&self) -> ColumnCategory {
        match self {
            ColumnType::Bool
            | ColumnType::Int2
            | ColumnType::Int4
            | ColumnType::Int8
            | ColumnType::Float4
            | ColumnType::Float8
            | ColumnType::Numeric => ColumnCategory::Numeric,
            ColumnType::Text | ColumnType::Uuid => ColumnCategory::Text,
            ColumnType::Date
            | ColumnType::Time
            | ColumnType::Timestamp
            | ColumnType::TimestampTz => ColumnCategory::Temporal,
            ColumnType::HStore => ColumnCategory::KeyValue,
            ColumnType::Bytea | ColumnType::Geometry => ColumnCategory::Binary,
            ColumnType::Unsupported(_) => ColumnCategory::Unsupported,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Unsupported(name) => f.write_str(name),
            other => write!(f, "{:?}", other),
        }
    }
}
