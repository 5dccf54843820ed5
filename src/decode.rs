//! Turns result rows into features.
//!
//! A row is split into its geometry, its feature id and everything else, which
//! becomes the feature's tags. hstore columns are flattened so that each of
//! their keys becomes a tag of its own.

use std::collections::HashMap;
use std::num::IntErrorKind;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hstore;
use crate::value::{ColumnType, FeatureId, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDescription {
    /// Describes a column from its name and driver type name.
    pub fn new(name: &str, type_name: &str) -> ColumnDescription {
        ColumnDescription {
            name: name.to_owned(),
            column_type: ColumnType::from_type_name(type_name),
        }
    }
}

/// One row as returned by a query executor. The column descriptions are
/// shared by every row of a result set.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRow {
    pub columns: Arc<[ColumnDescription]>,
    pub values: Vec<Value>,
}

/// A decoded feature. Null attributes are left out of `tags`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedRow {
    /// Geometry as returned by the query, typically WKB.
    pub geometry: Option<Vec<u8>>,
    pub id: Option<FeatureId>,
    pub tags: HashMap<String, Value>,
}

/// Decodes a single row.
///
/// `values` must line up with `columns`. The row must contain the geometry
/// column, and the id column too when one is given. A NULL geometry decodes
/// as `None`.
pub fn decipher_fields(
    geometry_column: &str,
    id_column: Option<&str>,
    columns: &[ColumnDescription],
    values: Vec<Value>,
) -> Result<DecodedRow> {
    if columns.len() != values.len() {
        return Err(Error::decode(
            geometry_column,
            format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            ),
        ));
    }
    if !columns.iter().any(|column| column.name == geometry_column) {
        return Err(Error::decode(
            geometry_column,
            "geometry column missing from result",
        ));
    }
    if let Some(id_column) = id_column {
        if !columns.iter().any(|column| column.name == id_column) {
            return Err(Error::decode(id_column, "id column missing from result"));
        }
    }

    let mut row = DecodedRow::default();
    for (column, value) in columns.iter().zip(values) {
        if column.name == geometry_column {
            row.geometry = geometry(column, value)?;
        } else if Some(column.name.as_str()) == id_column {
            row.id = feature_id(column, value)?;
        } else {
            add_tags(&mut row.tags, column, value, geometry_column, id_column)?;
        }
    }

    Ok(row)
}

fn geometry(column: &ColumnDescription, value: Value) -> Result<Option<Vec<u8>>> {
    match value {
        Value::Null => Ok(None),
        Value::Bytes(bytes) => Ok(Some(bytes)),
        Value::String(text) => Ok(Some(text.into_bytes())),
        other => Err(Error::decode(
            &column.name,
            format!("{} is not a geometry", other.kind()),
        )),
    }
}

// Covers the full i64 range; the upper bound itself is 2^63 and out of range.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

fn float_id(column: &ColumnDescription, value: f64) -> Result<Option<FeatureId>> {
    if value.is_finite() && value.fract() == 0.0 && value >= I64_LOWER && value < I64_UPPER {
        Ok(Some(FeatureId::Int(value as i64)))
    } else {
        Err(Error::decode(
            &column.name,
            format!("{} is not a valid integer id", value),
        ))
    }
}

fn feature_id(column: &ColumnDescription, value: Value) -> Result<Option<FeatureId>> {
    match value {
        Value::Null => Ok(None),
        Value::Int16(id) => Ok(Some(FeatureId::Int(id.into()))),
        Value::Int32(id) => Ok(Some(FeatureId::Int(id.into()))),
        Value::Int64(id) => Ok(Some(FeatureId::Int(id))),
        Value::Float32(id) => float_id(column, id.into()),
        Value::Float64(id) => float_id(column, id),
        Value::String(id) => match id.trim().parse::<i64>() {
            Ok(id) => Ok(Some(FeatureId::Int(id))),
            Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
                Err(Error::decode(
                    &column.name,
                    format!("id {} does not fit in 64 bits", id),
                ))
            }
            Err(_) => Ok(Some(FeatureId::Text(id))),
        },
        Value::Numeric(id) => match id.to_string().parse::<i64>() {
            Ok(id) => Ok(Some(FeatureId::Int(id))),
            Err(_) => Err(Error::decode(
                &column.name,
                format!("{} is not a valid integer id", id),
            )),
        },
        Value::Uuid(id) => Ok(Some(FeatureId::Text(id.to_string()))),
        value @ (Value::Bool(_)
        | Value::Bytes(_)
        | Value::Date(_)
        | Value::Time(_)
        | Value::Timestamp(_)
        | Value::TimestampTz(_)) => Err(Error::decode(
            &column.name,
            format!("cannot use a {} as a feature id", value.kind()),
        )),
    }
}

fn add_tags(
    tags: &mut HashMap<String, Value>,
    column: &ColumnDescription,
    value: Value,
    geometry_column: &str,
    id_column: Option<&str>,
) -> Result<()> {
    match &column.column_type {
        ColumnType::HStore => {
            let pairs = match value {
                Value::Null => return Ok(()),
                Value::String(text) => hstore::parse_text(&text),
                Value::Bytes(bytes) => hstore::parse_binary(&bytes),
                other => Err(format!("unexpected {} value", other.kind())),
            }
            .map_err(|reason| {
                Error::decode(&column.name, format!("malformed hstore: {}", reason))
            })?;

            for (key, value) in pairs {
                let reserved = key == geometry_column || Some(key.as_str()) == id_column;
                if let (Some(value), false) = (value, reserved) {
                    tags.insert(key, Value::String(value));
                }
            }
        }
        ColumnType::Unsupported(type_name) => {
            return Err(Error::decode(
                &column.name,
                format!("unsupported column type {}", type_name),
            ))
        }
        ColumnType::Bool
        | ColumnType::Int2
        | ColumnType::Int4
        | ColumnType::Int8
        | ColumnType::Float4
        | ColumnType::Float8
        | ColumnType::Numeric
        | ColumnType::Text
        | ColumnType::Bytea
        | ColumnType::Date
        | ColumnType::Time
        | ColumnType::Timestamp
        | ColumnType::TimestampTz
        | ColumnType::Uuid
        | ColumnType::Geometry => {
            if !value.is_null() {
                tags.insert(column.name.clone(), value);
            }
        }
    }

    Ok(())
}
