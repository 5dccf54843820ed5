//! # Tile Templar
//!
//! SQL templating and row decoding for PostGIS vector tile sources.
//!
//! ## Current features
//!
//! Given a layer's SQL template and a tile, this crate produces the query to run
//! against PostGIS, with the tile envelope, zoom, pixel size and scale
//! denominator filled in through `!TOKEN!` placeholders. Request parameters are
//! bound positionally rather than spliced into the SQL. Result rows are turned
//! into features: a geometry, an id and a flat map of tags, with hstore columns
//! expanded into individual tags and numeric widths preserved.
//!
//! ## Known Limitations
//!
//! Tiles are always addressed on the web mercator (EPSG:3857) grid. Layers may
//! be stored in EPSG:3857 or EPSG:4326; other projections are rejected.
//! Encoding features into Mapbox Vector Tiles is left to the caller, as is
//! serving tiles over HTTP.
//!
//! The executor behind [`postgis::PostgisProvider`] is a trait, so features can
//! be served from something other than a `sqlx` pool, e.g. in tests.

#![deny(warnings)]

// TODO: remove once async fn in traits become stable
use async_trait::async_trait;

pub mod config;
pub mod decode;
pub mod error;
pub mod hstore;
pub mod params;
pub mod postgis;
pub mod tile;
pub mod tokens;
pub mod value;

pub use config::{Layer, LayerConfig, ProviderConfig};
pub use decode::{decipher_fields, ColumnDescription, DecodedRow, RawRow};
pub use error::{Error, Result};
pub use params::{bind_parameters, QueryParameter, QueryParameters};
pub use postgis::{PostgisProvider, QueryExecutor};
pub use tile::{Envelope, Tile};
pub use tokens::{replace_tokens, uppercase_tokens, TokenTable};
pub use value::{ColumnType, FeatureId, Value};

/// This is the main trait exported by this crate. It is presently rather barebones,
/// but is open for future expansion if other sources become relevant.
#[async_trait]
pub trait TileSource: Sized {
    /// Fetches and decodes the features of one layer for a slippy map tile.
    async fn features(
        &self,
        layer: &str,
        tile: &Tile,
        params: Option<&QueryParameters>,
    ) -> Result<Vec<DecodedRow>>;
}
