//! PostGIS-backed tile source.
use std::collections::HashMap;
use std::sync::Arc;

// TODO: remove once async fn in traits become stable
use async_trait::async_trait;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use log::debug;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, PgValueFormat};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};

use crate::config::{Layer, ProviderConfig};
use crate::decode::{decipher_fields, ColumnDescription, DecodedRow, RawRow};
use crate::error::{Error, Result};
use crate::params::{bind_parameters, resolve_parameters, ParamConfig, QueryParameters};
use crate::tile::Tile;
use crate::tokens::replace_tokens;
use crate::value::{ColumnType, Value};
use crate::TileSource;

/// Runs a bound query and streams back its rows.
///
/// Dropping the stream cancels the query and releases whatever connection it
/// holds.
pub trait QueryExecutor: Send + Sync {
    fn query<'a>(&'a self, sql: &'a str, args: &'a [Value]) -> BoxStream<'a, Result<RawRow>>;
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        // Binds as a TEXT-typed NULL; fragments comparing it to other types
        // need an explicit cast, e.g. `population >= ?::int`
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int16(v) => query.bind(*v),
        Value::Int32(v) => query.bind(*v),
        Value::Int64(v) => query.bind(*v),
        Value::Float32(v) => query.bind(*v),
        Value::Float64(v) => query.bind(*v),
        Value::Numeric(v) => query.bind(v.clone()),
        Value::String(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::TimestampTz(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(*v),
    }
}

fn describe_columns(row: &PgRow) -> Arc<[ColumnDescription]> {
    row.columns()
        .iter()
        .map(|column| ColumnDescription::new(column.name(), column.type_info().name()))
        .collect()
}

/// Reads a column without interpreting it: bytes in binary format, a string
/// in text format.
fn raw_value(row: &PgRow, index: usize, column: &ColumnDescription) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let invalid = |e: sqlx::error::BoxDynError| Error::decode(&column.name, e.to_string());
    match raw.format() {
        PgValueFormat::Binary => Ok(Value::Bytes(raw.as_bytes().map_err(invalid)?.to_vec())),
        PgValueFormat::Text => Ok(Value::String(raw.as_str().map_err(invalid)?.to_owned())),
    }
}

fn decode_value(row: &PgRow, index: usize, column: &ColumnDescription) -> Result<Value> {
    let value = match &column.column_type {
        ColumnType::Bool => row.try_get::<Option<bool>, _>(index)?.into(),
        ColumnType::Int2 => row.try_get::<Option<i16>, _>(index)?.into(),
        ColumnType::Int4 => row.try_get::<Option<i32>, _>(index)?.into(),
        ColumnType::Int8 => row.try_get::<Option<i64>, _>(index)?.into(),
        ColumnType::Float4 => row.try_get::<Option<f32>, _>(index)?.into(),
        ColumnType::Float8 => row.try_get::<Option<f64>, _>(index)?.into(),
        ColumnType::Numeric => row.try_get::<Option<BigDecimal>, _>(index)?.into(),
        // Covers varchar, bpchar, name and citext, which share text's encoding
        ColumnType::Text => row.try_get_unchecked::<Option<String>, _>(index)?.into(),
        ColumnType::Bytea => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map_or(Value::Null, Value::Bytes),
        ColumnType::Date => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map_or(Value::Null, Value::Date),
        ColumnType::Time => row
            .try_get::<Option<NaiveTime>, _>(index)?
            .map_or(Value::Null, Value::Time),
        ColumnType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map_or(Value::Null, Value::Timestamp),
        ColumnType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map_or(Value::Null, Value::TimestampTz),
        ColumnType::Uuid => row
            .try_get::<Option<Uuid>, _>(index)?
            .map_or(Value::Null, Value::Uuid),
        ColumnType::HStore | ColumnType::Geometry | ColumnType::Unsupported(_) => {
            raw_value(row, index, column)?
        }
    };

    Ok(value)
}

fn raw_row(row: &PgRow, columns: Arc<[ColumnDescription]>) -> Result<RawRow> {
    let values = columns
        .iter()
        .enumerate()
        .map(|(index, column)| decode_value(row, index, column))
        .collect::<Result<Vec<Value>>>()?;

    Ok(RawRow { columns, values })
}

impl QueryExecutor for PgPool {
    fn query<'a>(&'a self, sql: &'a str, args: &'a [Value]) -> BoxStream<'a, Result<RawRow>> {
        let query = args.iter().fold(sqlx::query(sql), bind_value);

        // Every row of a result set has the same columns
        let mut columns: Option<Arc<[ColumnDescription]>> = None;
        query
            .fetch(self)
            .map(move |row| -> Result<RawRow> {
                let row = row?;
                let columns = columns
                    .get_or_insert_with(|| describe_columns(&row))
                    .clone();
                raw_row(&row, columns)
            })
            .boxed()
    }
}

/// Serves features for a set of layers from a PostGIS database.
pub struct PostgisProvider<E = PgPool> {
    executor: E,
    layers: Vec<Layer>,
    params: Vec<ParamConfig>,
}

impl PostgisProvider<PgPool> {
    /// Connects a pool using the provider config and builds its layers.
    pub async fn connect(config: &ProviderConfig) -> Result<PostgisProvider<PgPool>> {
        let layers = config.layers()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await?;

        Ok(PostgisProvider::new(pool, layers, config.params.clone()))
    }
}

impl<E: QueryExecutor> PostgisProvider<E> {
    pub fn new(executor: E, layers: Vec<Layer>, params: Vec<ParamConfig>) -> PostgisProvider<E> {
        PostgisProvider {
            executor,
            layers,
            params,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Result<&Layer> {
        self.layers
            .iter()
            .find(|layer| layer.name == name)
            .ok_or_else(|| Error::UnknownLayer(name.to_owned()))
    }

    /// Produces the final SQL and its positional arguments for one layer and tile.
    pub fn layer_query(
        &self,
        layer: &Layer,
        tile: &Tile,
        params: Option<&QueryParameters>,
    ) -> Result<(String, Vec<Value>)> {
        let sql = replace_tokens(&layer.sql, layer, tile, true)?;
        let mut args = Vec::new();
        let sql = bind_parameters(params, &sql, &mut args)?;

        Ok((sql, args))
    }

    /// Like [`TileSource::features`], resolving the configured parameters from
    /// raw request arguments first.
    pub async fn request_features(
        &self,
        layer: &str,
        tile: &Tile,
        request: &HashMap<String, String>,
    ) -> Result<Vec<DecodedRow>> {
        let params = resolve_parameters(&self.params, request)?;
        self.features(layer, tile, Some(&params)).await
    }
}

#[async_trait]
impl<E: QueryExecutor> TileSource for PostgisProvider<E> {
    async fn features(
        &self,
        layer: &str,
        tile: &Tile,
        params: Option<&QueryParameters>,
    ) -> Result<Vec<DecodedRow>> {
        let layer = self.layer(layer)?;
        let (sql, args) = self.layer_query(layer, tile, params)?;
        debug!(
            "Querying layer {} for tile {}/{}/{} with {} args: {}",
            layer.name,
            tile.zoom(),
            tile.column(),
            tile.row(),
            args.len(),
            sql
        );

        let mut features = Vec::new();
        let mut rows = self.executor.query(&sql, &args);
        while let Some(row) = rows.try_next().await? {
            let feature = decipher_fields(
                &layer.geometry_column,
                layer.id_column.as_deref(),
                &row.columns,
                row.values,
            )?;

            if feature.geometry.is_none() {
                debug!(
                    "Skipping feature {:?} in layer {} without geometry",
                    feature.id, layer.name
                );
                continue;
            }
            features.push(feature);
        }

        Ok(features)
    }
}
