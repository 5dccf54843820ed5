//! Provider configuration, loaded from YAML.
//!
//! A provider is a PostGIS database plus the layers that are queried from it.
//! Layers either give a full SQL template or just a table name, in which case
//! the query is generated.

use log::warn;
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::{Error, Result};
use crate::params::ParamConfig;
use crate::tile::{meters_per_unit, WEB_MERCATOR};
use crate::tokens::{quote_identifier, uppercase_tokens, BBOX_TOKEN};

#[derive(Clone, Deserialize, Debug)]
pub struct ProviderConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Spatial reference of layers that don't set their own.
    #[serde(default = "default_srid")]
    pub srid: u32,
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub params: Vec<ParamConfig>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct LayerConfig {
    pub name: String,
    pub sql: Option<String>,
    #[serde(rename = "tablename")]
    pub table: Option<String>,
    #[serde(rename = "geometry_fieldname", default = "default_geometry_field")]
    pub geometry_column: String,
    #[serde(rename = "id_fieldname", default = "default_id_field")]
    pub id_column: Option<String>,
    /// Extra columns selected by generated table queries.
    #[serde(default)]
    pub fields: Vec<String>,
    pub srid: Option<u32>,
}

/// A queryable layer. Read-only once built, and safe to share between
/// concurrent tile requests.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub name: String,
    pub srid: u32,
    /// SQL template with `!TOKEN!` placeholders.
    pub sql: String,
    pub geometry_column: String,
    pub id_column: Option<String>,
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    100
}

fn default_srid() -> u32 {
    WEB_MERCATOR
}

fn default_geometry_field() -> String {
    String::from("geom")
}

fn default_id_field() -> Option<String> {
    Some(String::from("gid"))
}

impl ProviderConfig {
    /// Parses and validates a provider from a YAML string.
    pub fn from_yaml(data: &str) -> Result<ProviderConfig> {
        let config: ProviderConfig = serde_yaml::from_str(data)?;

        if config.max_connections == 0 {
            return Err(Error::InvalidConfig(String::from(
                "max_connections must be at least 1",
            )));
        }
        for param in config.params.iter() {
            param.validate()?;
        }

        Ok(config)
    }

    /// Builds every configured layer.
    pub fn layers(&self) -> Result<Vec<Layer>> {
        let mut layers: Vec<Layer> = Vec::with_capacity(self.layers.len());
        for config in self.layers.iter() {
            if layers.iter().any(|layer| layer.name == config.name) {
                return Err(Error::InvalidConfig(format!(
                    "layer {} is defined more than once",
                    config.name
                )));
            }
            layers.push(Layer::from_config(config, self.srid)?);
        }

        Ok(layers)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .application_name(env!("CARGO_PKG_NAME"))
    }
}

impl Layer {
    pub fn from_config(config: &LayerConfig, default_srid: u32) -> Result<Layer> {
        let sql = match (&config.sql, &config.table) {
            (Some(sql), None) => {
                if !uppercase_tokens(sql).contains(BBOX_TOKEN) {
                    return Err(Error::Template(format!(
                        "SQL for layer {} must contain {}",
                        config.name, BBOX_TOKEN
                    )));
                }
                sql.clone()
            }
            (None, Some(table)) => table_sql(config, table),
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "layer {} needs exactly one of sql or tablename",
                    config.name
                )))
            }
        };

        let srid = config.srid.unwrap_or(default_srid);
        if meters_per_unit(srid).is_err() {
            return Err(Error::InvalidConfig(format!(
                "layer {} uses unsupported spatial reference EPSG:{}",
                config.name, srid
            )));
        }

        Ok(Layer {
            name: config.name.clone(),
            srid,
            sql,
            geometry_column: config.geometry_column.clone(),
            id_column: config.id_column.clone(),
        })
    }
}

/// Generates the query for a table-backed layer.
fn table_sql(config: &LayerConfig, table: &str) -> String {
    let geometry = quote_identifier(&config.geometry_column);
    let mut columns = vec![format!("ST_AsBinary({}) AS {}", geometry, geometry)];
    if let Some(id) = &config.id_column {
        columns.push(quote_identifier(id));
    }

    for field in config.fields.iter() {
        if *field == config.geometry_column || Some(field) == config.id_column.as_ref() {
            warn!(
                "Ignoring field {} in layer {}; it is already selected",
                field, config.name
            );
            continue;
        }
        columns.push(quote_identifier(field));
    }

    format!(
        "SELECT {} FROM {} WHERE {} && {}",
        columns.join(", "),
        table,
        geometry,
        BBOX_TOKEN
    )
}
