//! Web mercator tile geometry.
//!
//! Tiles are addressed on the standard power-of-two XYZ grid, with row 0 at the
//! northern edge of the world. Everything here is plain floating point math; no
//! value is rounded, so coordinates can be written into SQL at full precision.

use std::f64::consts::PI;

use crate::error::{Error, Result};

/// EPSG:3857, spherical (web) mercator.
pub const WEB_MERCATOR: u32 = 3857;

/// EPSG:4326, WGS84 longitude/latitude.
pub const WGS84: u32 = 4326;

/// Half the width of the web mercator world, in meters.
pub const WEB_MERCATOR_MAX: f64 = 20037508.34;

/// Width and height of an MVT tile in its own integer coordinate space.
/// Buffers are expressed in these units.
pub const MVT_EXTENT: f64 = 4096.0;

/// Nominal size of a rendered tile in screen pixels.
pub const TILE_SIZE: f64 = 256.0;

/// Standardized rendering pixel size (0.28 mm), used for scale denominators.
pub const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// Deepest zoom before the envelope math loses sub-pixel precision.
pub const MAX_ZOOM: u8 = 30;

const EARTH_RADIUS: f64 = 6378137.0;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Builds an envelope, rejecting coordinates that are not finite.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Envelope> {
        if [min_x, min_y, max_x, max_y].iter().all(|c| c.is_finite()) {
            Ok(Envelope {
                min_x,
                min_y,
                max_x,
                max_y,
            })
        } else {
            Err(Error::Geometry(format!(
                "non-finite envelope ({}, {}, {}, {})",
                min_x, min_y, max_x, max_y
            )))
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Converts a web mercator envelope into the given spatial reference.
    pub fn reproject(&self, srid: u32) -> Result<Envelope> {
        match srid {
            WEB_MERCATOR => Ok(*self),
            WGS84 => {
                let (min_lon, min_lat) = mercator_to_lon_lat(self.min_x, self.min_y);
                let (max_lon, max_lat) = mercator_to_lon_lat(self.max_x, self.max_y);
                Envelope::new(min_lon, min_lat, max_lon, max_lat)
            }
            other => Err(Error::Geometry(format!(
                "cannot reproject from EPSG:{} to EPSG:{}",
                WEB_MERCATOR, other
            ))),
        }
    }
}

fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Map units per meter for the spatial references we know about.
pub fn meters_per_unit(srid: u32) -> Result<f64> {
    match srid {
        WEB_MERCATOR => Ok(1.0),
        // One degree of longitude at the equator.
        WGS84 => Ok(2.0 * PI * EARTH_RADIUS / 360.0),
        other => Err(Error::Geometry(format!("unknown spatial reference EPSG:{}", other))),
    }
}

/// A single map tile request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tile {
    zoom: u8,
    column: u32,
    row: u32,
    buffer: f64,
    srid: u32,
}

impl Tile {
    /// Creates a tile. `buffer` is the number of MVT units (out of 4096) that
    /// the envelope is grown by on every side.
    pub fn new(zoom: u8, column: u32, row: u32, buffer: f64, srid: u32) -> Tile {
        Tile {
            zoom,
            column,
            row,
            buffer,
            srid,
        }
    }

    /// The web mercator tile containing a WGS84 point at the given zoom.
    pub fn containing(lon: f64, lat: f64, zoom: u8, buffer: f64) -> Result<Tile> {
        if !(-180.0..=180.0).contains(&lon) || !(-85.0511..=85.0511).contains(&lat) {
            return Err(Error::Geometry(format!(
                "({}, {}) is outside the web mercator world",
                lon, lat
            )));
        }
        if zoom > MAX_ZOOM {
            return Err(Error::Geometry(format!("zoom {} exceeds {}", zoom, MAX_ZOOM)));
        }

        let (x, y) = slippy_map_tilenames::lonlat2tile(lon, lat, zoom);
        // The antimeridian and the southern edge belong to the last tile.
        let last = (1u32 << zoom) - 1;
        Ok(Tile::new(zoom, x.min(last), y.min(last), buffer, WEB_MERCATOR))
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    pub fn srid(&self) -> u32 {
        self.srid
    }

    fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM {
            return Err(Error::Geometry(format!(
                "zoom {} exceeds the precision ceiling of {}",
                self.zoom, MAX_ZOOM
            )));
        }
        let tiles = 1u64 << self.zoom;
        if u64::from(self.column) >= tiles || u64::from(self.row) >= tiles {
            return Err(Error::Geometry(format!(
                "tile {}/{}/{} is outside the grid",
                self.zoom, self.column, self.row
            )));
        }
        if self.srid != WEB_MERCATOR {
            return Err(Error::Geometry(format!(
                "tiles in EPSG:{} are not supported",
                self.srid
            )));
        }
        Ok(())
    }

    /// Side length of a tile at this zoom, in map units. Exactly half of the
    /// span one zoom level up.
    pub fn span(&self) -> f64 {
        WEB_MERCATOR_MAX * 2.0 / 2f64.powi(i32::from(self.zoom))
    }

    /// The tile's envelope without any buffer.
    pub fn bounds(&self) -> Result<Envelope> {
        self.validate()?;

        let side = self.span();
        let column = f64::from(self.column);
        let row = f64::from(self.row);

        Envelope::new(
            -WEB_MERCATOR_MAX + column * side,
            WEB_MERCATOR_MAX - (row + 1.0) * side,
            -WEB_MERCATOR_MAX + (column + 1.0) * side,
            WEB_MERCATOR_MAX - row * side,
        )
    }

    /// The tile's envelope grown by the buffer.
    pub fn buffered_bounds(&self) -> Result<Envelope> {
        if !self.buffer.is_finite() || self.buffer < 0.0 {
            return Err(Error::Geometry(format!("invalid buffer {}", self.buffer)));
        }

        let bounds = self.bounds()?;
        let buffer_x = self.buffer * bounds.width() / MVT_EXTENT;
        let buffer_y = self.buffer * bounds.height() / MVT_EXTENT;

        Envelope::new(
            bounds.min_x - buffer_x,
            bounds.min_y - buffer_y,
            bounds.max_x + buffer_x,
            bounds.max_y + buffer_y,
        )
    }

    /// Width of one screen pixel in map units.
    pub fn pixel_width(&self) -> Result<f64> {
        Ok(self.bounds()?.width() / TILE_SIZE)
    }

    /// Height of one screen pixel in map units.
    pub fn pixel_height(&self) -> Result<f64> {
        Ok(self.bounds()?.height() / TILE_SIZE)
    }

    pub fn scale_denominator(&self) -> Result<f64> {
        Ok(self.pixel_width()? * meters_per_unit(self.srid)? / STANDARD_PIXEL_SIZE)
    }
}

/// Formats a float the way C's `%g` does with shortest round-trip digits:
/// scientific notation when the decimal exponent is below -4 or at least 6,
/// plain decimal otherwise. No significant digits are dropped.
pub fn format_float_g(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }

    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => (mantissa, exponent),
            Err(_) => return value.to_string(),
        },
        None => return value.to_string(),
    };

    if exponent < -4 || exponent >= 6 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    #[test]
    fn test_buffered_bounds() {
        let tile = Tile::new(2, 1, 1, 64.0, WEB_MERCATOR);
        let bounds = tile.buffered_bounds().expect("valid tile");

        assert_eq!(-10175297.20390625, bounds.min_x);
        assert_eq!(-156543.03390625, bounds.min_y);
        assert_eq!(156543.03390625, bounds.max_x);
        assert_eq!(10175297.20390625, bounds.max_y);
    }

    #[test]
    fn test_unbuffered_bounds() {
        let world = Tile::new(0, 0, 0, 0.0, WEB_MERCATOR).bounds().unwrap();
        assert_eq!(-WEB_MERCATOR_MAX, world.min_x);
        assert_eq!(-WEB_MERCATOR_MAX, world.min_y);
        assert_eq!(WEB_MERCATOR_MAX, world.max_x);
        assert_eq!(WEB_MERCATOR_MAX, world.max_y);

        // Row 0 is the northernmost row
        let north_west = Tile::new(1, 0, 0, 0.0, WEB_MERCATOR).bounds().unwrap();
        assert_eq!(0.0, north_west.min_y);
        assert_eq!(WEB_MERCATOR_MAX, north_west.max_y);
        assert_eq!(0.0, north_west.max_x);

        // A zero buffer changes nothing
        let tile = Tile::new(11, 1070, 676, 0.0, WEB_MERCATOR);
        assert_eq!(tile.bounds().unwrap(), tile.buffered_bounds().unwrap());
    }

    #[test]
    fn test_zoom_halves_envelope() {
        let mut previous = Tile::new(0, 0, 0, 0.0, WEB_MERCATOR);
        for zoom in 1..=MAX_ZOOM {
            let tile = Tile::new(zoom, 0, 0, 0.0, WEB_MERCATOR);
            assert_eq!(previous.span() / 2.0, tile.span());

            let (coarse, fine) = (previous.bounds().unwrap(), tile.bounds().unwrap());
            assert_approx_eq!(coarse.width() / 2.0, fine.width(), 1e-6);
            assert_approx_eq!(coarse.height() / 2.0, fine.height(), 1e-6);
            previous = tile;
        }

        let coarse = Tile::new(13, 4000, 3000, 0.0, WEB_MERCATOR).bounds().unwrap();
        let fine = Tile::new(14, 8001, 6001, 0.0, WEB_MERCATOR).bounds().unwrap();
        assert_approx_eq!(coarse.width() / 2.0, fine.width(), 1e-6);
        assert_approx_eq!(coarse.height() / 2.0, fine.height(), 1e-6);
    }

    #[test]
    fn test_pixel_size_and_scale() {
        let tile = Tile::new(11, 1070, 676, 64.0, WEB_MERCATOR);

        assert_eq!(76.43702827453671, tile.pixel_width().unwrap());
        assert_eq!(76.43702827453671, tile.pixel_height().unwrap());
        assert_eq!(272989.38669477403, tile.scale_denominator().unwrap());

        // A zoom 0 pixel covers the world divided by 256
        let world = Tile::new(0, 0, 0, 0.0, WEB_MERCATOR);
        assert_approx_eq!(156543.03390625, world.pixel_width().unwrap(), 1e-9);
        assert_approx_eq!(559082263.9508929, world.scale_denominator().unwrap(), 1e-3);
    }

    #[test]
    fn test_invalid_tiles() {
        assert!(matches!(
            Tile::new(MAX_ZOOM + 1, 0, 0, 0.0, WEB_MERCATOR).bounds(),
            Err(Error::Geometry(_))
        ));
        assert!(matches!(
            Tile::new(2, 4, 0, 0.0, WEB_MERCATOR).bounds(),
            Err(Error::Geometry(_))
        ));
        assert!(matches!(
            Tile::new(2, 0, 0, 0.0, 2154).bounds(),
            Err(Error::Geometry(_))
        ));
        assert!(matches!(
            Tile::new(2, 0, 0, f64::NAN, WEB_MERCATOR).buffered_bounds(),
            Err(Error::Geometry(_))
        ));
        assert!(Envelope::new(0.0, 0.0, f64::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_reproject() {
        let world = Tile::new(0, 0, 0, 0.0, WEB_MERCATOR).bounds().unwrap();
        assert_eq!(world, world.reproject(WEB_MERCATOR).unwrap());

        let lon_lat = world.reproject(WGS84).unwrap();
        assert_approx_eq!(-180.0, lon_lat.min_x, 1e-5);
        assert_approx_eq!(180.0, lon_lat.max_x, 1e-5);
        assert_approx_eq!(-85.0511, lon_lat.min_y, 1e-4);
        assert_approx_eq!(85.0511, lon_lat.max_y, 1e-4);

        assert!(world.reproject(27700).is_err());
    }

    #[test]
    fn test_containing() {
        let tile = Tile::containing(0.0, 0.0, 1, 0.0).unwrap();
        assert_eq!((1, 1), (tile.column(), tile.row()));

        // Berlin
        let tile = Tile::containing(13.4050, 52.5200, 10, 64.0).unwrap();
        assert_eq!((550, 335), (tile.column(), tile.row()));
        assert_eq!(64.0, tile.buffer());
        assert_eq!(WEB_MERCATOR, tile.srid());

        let tile = Tile::containing(180.0, -85.0511, 3, 0.0).unwrap();
        assert_eq!((7, 7), (tile.column(), tile.row()));

        assert!(Tile::containing(0.0, 89.0, 3, 0.0).is_err());
    }

    #[test]
    fn test_format_float_g() {
        assert_eq!("-1.017529720390625e+07", format_float_g(-10175297.20390625));
        assert_eq!("-156543.03390625", format_float_g(-156543.03390625));
        assert_eq!("899816.6968478388", format_float_g(899816.6968478388));
        assert_eq!("6.789748347570495e+06", format_float_g(6789748.347570495));
        assert_eq!("1e-05", format_float_g(0.00001));
        assert_eq!("0.0001", format_float_g(0.0001));
        assert_eq!("100000", format_float_g(100000.0));
        assert_eq!("1e+06", format_float_g(1000000.0));
        assert_eq!("0", format_float_g(0.0));
    }
}
