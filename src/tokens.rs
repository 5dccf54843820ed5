//! `!TOKEN!` substitution for layer SQL.
//!
//! Layer queries are written with placeholders such as `!BBOX!` or `!ZOOM!`
//! which are filled in per tile. Tokens are case-insensitive. Anything that
//! looks like a token but is not a built-in is left alone so that named query
//! parameters can be bound afterwards (see [`crate::params`]).

use std::collections::HashMap;
use std::ops::Range;

use once_cell::sync::Lazy;

use crate::config::Layer;
use crate::error::{Error, Result};
use crate::tile::{format_float_g, Envelope, Tile};

pub const BBOX_TOKEN: &str = "!BBOX!";
pub const ZOOM_TOKEN: &str = "!ZOOM!";
pub const Z_TOKEN: &str = "!Z!";
pub const X_TOKEN: &str = "!X!";
pub const Y_TOKEN: &str = "!Y!";
pub const PIXEL_WIDTH_TOKEN: &str = "!PIXEL_WIDTH!";
pub const PIXEL_HEIGHT_TOKEN: &str = "!PIXEL_HEIGHT!";
pub const SCALE_DENOMINATOR_TOKEN: &str = "!SCALE_DENOMINATOR!";
pub const ID_FIELD_TOKEN: &str = "!ID_FIELD!";
pub const GEOM_FIELD_TOKEN: &str = "!GEOM_FIELD!";

/// Everything a built-in token may need, computed once per substitution.
pub struct TokenValues<'a> {
    pub layer: &'a Layer,
    pub tile: &'a Tile,
    pub envelope: Envelope,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub scale_denominator: f64,
}

impl<'a> TokenValues<'a> {
    pub fn new(layer: &'a Layer, tile: &'a Tile) -> Result<TokenValues<'a>> {
        Ok(TokenValues {
            layer,
            tile,
            envelope: tile.buffered_bounds()?.reproject(layer.srid)?,
            pixel_width: tile.pixel_width()?,
            pixel_height: tile.pixel_height()?,
            scale_denominator: tile.scale_denominator()?,
        })
    }
}

pub type TokenHandler = fn(&TokenValues) -> Result<String>;

/// An immutable lookup table from token to handler.
pub struct TokenTable {
    handlers: HashMap<&'static str, TokenHandler>,
}

static BUILTIN_TOKENS: Lazy<TokenTable> = Lazy::new(|| {
    TokenTable::new()
        .with(BBOX_TOKEN, bbox)
        .with(ZOOM_TOKEN, zoom)
        .with(Z_TOKEN, zoom)
        .with(X_TOKEN, |values| Ok(values.tile.column().to_string()))
        .with(Y_TOKEN, |values| Ok(values.tile.row().to_string()))
        .with(PIXEL_WIDTH_TOKEN, |values| Ok(values.pixel_width.to_string()))
        .with(PIXEL_HEIGHT_TOKEN, |values| Ok(values.pixel_height.to_string()))
        .with(SCALE_DENOMINATOR_TOKEN, |values| {
            Ok(values.scale_denominator.to_string())
        })
        .with(ID_FIELD_TOKEN, id_field)
        .with(GEOM_FIELD_TOKEN, |values| {
            Ok(quote_identifier(&values.layer.geometry_column))
        })
});

fn bbox(values: &TokenValues) -> Result<String> {
    let envelope = &values.envelope;
    Ok(format!(
        "ST_MakeEnvelope({},{},{},{},{})",
        format_float_g(envelope.min_x),
        format_float_g(envelope.min_y),
        format_float_g(envelope.max_x),
        format_float_g(envelope.max_y),
        values.layer.srid
    ))
}

fn zoom(values: &TokenValues) -> Result<String> {
    Ok(values.tile.zoom().to_string())
}

fn id_field(values: &TokenValues) -> Result<String> {
    match &values.layer.id_column {
        Some(column) => Ok(quote_identifier(column)),
        None => Err(Error::Template(format!(
            "layer {} uses {} but has no id field",
            values.layer.name, ID_FIELD_TOKEN
        ))),
    }
}

impl TokenTable {
    /// An empty table.
    pub fn new() -> TokenTable {
        TokenTable {
            handlers: HashMap::new(),
        }
    }

    /// The built-in tile tokens.
    pub fn builtin() -> &'static TokenTable {
        &BUILTIN_TOKENS
    }

    pub fn with(mut self, token: &'static str, handler: TokenHandler) -> TokenTable {
        self.handlers.insert(token, handler);
        self
    }

    /// Whether `token` (including its `!` delimiters, any case) is handled here.
    pub fn contains(&self, token: &str) -> bool {
        self.handlers.contains_key(token.to_ascii_uppercase().as_str())
    }

    /// Substitutes every known token in `template` for the given layer and tile.
    ///
    /// With `strict_envelope` set, a template without `!BBOX!` is rejected.
    /// Nothing is returned on error; the output is only built once every value
    /// it needs has been computed.
    pub fn replace(
        &self,
        template: &str,
        layer: &Layer,
        tile: &Tile,
        strict_envelope: bool,
    ) -> Result<String> {
        let sql = uppercase_tokens(template);

        if strict_envelope && !sql.contains(BBOX_TOKEN) {
            return Err(Error::Template(format!(
                "query for layer {} does not contain {}",
                layer.name, BBOX_TOKEN
            )));
        }

        let values = TokenValues::new(layer, tile)?;

        let mut result = String::with_capacity(sql.len());
        let mut position = 0;
        while let Some(range) = find_token(&sql, position) {
            result.push_str(&sql[position..range.start]);
            let token = &sql[range.clone()];
            match self.handlers.get(token) {
                Some(handler) => result.push_str(&handler(&values)?),
                None => result.push_str(token),
            }
            position = range.end;
        }
        result.push_str(&sql[position..]);

        Ok(result)
    }
}

impl Default for TokenTable {
    fn default() -> Self {
        TokenTable::new()
    }
}

/// Replaces the built-in tokens in `template`. See [`TokenTable::replace`].
pub fn replace_tokens(
    template: &str,
    layer: &Layer,
    tile: &Tile,
    strict_envelope: bool,
) -> Result<String> {
    TokenTable::builtin().replace(template, layer, tile, strict_envelope)
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

/// Finds the next `!NAME!` token at or after `from`.
fn find_token(s: &str, from: usize) -> Option<Range<usize>> {
    let bytes = s.as_bytes();
    let mut start = from;

    while let Some(offset) = s[start..].find('!') {
        let open = start + offset;
        let name_len = bytes[open + 1..]
            .iter()
            .take_while(|byte| is_token_byte(**byte))
            .count();
        let close = open + 1 + name_len;
        if name_len > 0 && bytes.get(close) == Some(&b'!') {
            return Some(open..close + 1);
        }
        start = open + 1;
    }

    None
}

/// Uppercases every `!token!` in `s`, leaving the rest of the text untouched.
pub fn uppercase_tokens(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut position = 0;
    while let Some(range) = find_token(s, position) {
        result.push_str(&s[position..range.start]);
        result.push_str(&s[range.clone()].to_ascii_uppercase());
        position = range.end;
    }
    result.push_str(&s[position..]);

    result
}

/// Whether `s` is shaped like a token, i.e. `!NAME!` and nothing else.
pub fn is_token(s: &str) -> bool {
    find_token(s, 0) == Some(0..s.len())
}

/// Double-quotes a SQL identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{WEB_MERCATOR, WGS84};

    fn layer(srid: u32) -> Layer {
        Layer {
            name: String::from("test"),
            srid,
            sql: String::new(),
            geometry_column: String::from("geom"),
            id_column: Some(String::from("gid")),
        }
    }

    #[test]
    fn test_uppercase_tokens() {
        let cases = [
            (
                "this !lower! case !STrInG! should uppercase !TOKENS!",
                "this !LOWER! case !STRING! should uppercase !TOKENS!",
            ),
            ("no token", "no token"),
            ("", ""),
            ("unclosed !token", "unclosed !token"),
            ("a != b and !bbox!", "a != b and !BBOX!"),
            ("!!zoom!!", "!!ZOOM!!"),
        ];

        for (input, expected) in cases.iter() {
            assert_eq!(*expected, uppercase_tokens(input), "input: {}", input);
        }
    }

    #[test]
    fn test_replace_tokens() {
        let cases = [
            (
                "SELECT * FROM foo WHERE geom && !BBOX!",
                Tile::new(2, 1, 1, 64.0, WEB_MERCATOR),
                "SELECT * FROM foo WHERE geom && ST_MakeEnvelope(-1.017529720390625e+07,-156543.03390625,156543.03390625,1.017529720390625e+07,3857)",
            ),
            (
                "SELECT * FROM foo WHERE geom && !BBOX! AND bar != 42",
                Tile::new(2, 1, 1, 64.0, WEB_MERCATOR),
                "SELECT * FROM foo WHERE geom && ST_MakeEnvelope(-1.017529720390625e+07,-156543.03390625,156543.03390625,1.017529720390625e+07,3857) AND bar != 42",
            ),
            (
                "SELECT id, scalerank=!ZOOM! FROM foo WHERE geom && !BBOX!",
                Tile::new(2, 1, 1, 64.0, WEB_MERCATOR),
                "SELECT id, scalerank=2 FROM foo WHERE geom && ST_MakeEnvelope(-1.017529720390625e+07,-156543.03390625,156543.03390625,1.017529720390625e+07,3857)",
            ),
            (
                "SELECT id, scalerank=!zoom! FROM foo WHERE geom && !bbox!",
                Tile::new(16, 11241, 26168, 64.0, WEB_MERCATOR),
                "SELECT id, scalerank=16 FROM foo WHERE geom && ST_MakeEnvelope(-1.3163688815956049e+07,4.0352540420407765e+06,-1.3163058210472783e+07,4.035884647524042e+06,3857)",
            ),
            (
                "SELECT id, !pixel_width! as width, !pixel_height! as height, !scale_denominator! as scale_denom FROM foo WHERE geom && !BBOX!",
                Tile::new(11, 1070, 676, 64.0, WEB_MERCATOR),
                "SELECT id, 76.43702827453671 as width, 76.43702827453671 as height, 272989.38669477403 as scale_denom FROM foo WHERE geom && ST_MakeEnvelope(899816.6968478388,6.789748347570495e+06,919996.0723123164,6.809927723034973e+06,3857)",
            ),
            (
                "SELECT !ID_FIELD!, !GEOM_FIELD! FROM foo_!z!_!x!_!y! WHERE !GEOM_FIELD! && !BBOX!",
                Tile::new(0, 0, 0, 0.0, WEB_MERCATOR),
                "SELECT \"gid\", \"geom\" FROM foo_0_0_0 WHERE \"geom\" && ST_MakeEnvelope(-2.003750834e+07,-2.003750834e+07,2.003750834e+07,2.003750834e+07,3857)",
            ),
        ];

        let layer = layer(WEB_MERCATOR);
        for (template, tile, expected) in cases.iter() {
            let sql = replace_tokens(template, &layer, tile, true).expect("valid template");
            assert_eq!(*expected, sql);
        }
    }

    #[test]
    fn test_replace_tokens_lon_lat_layer() {
        let tile = Tile::new(0, 0, 0, 0.0, WEB_MERCATOR);
        let sql = replace_tokens("!BBOX!", &layer(WGS84), &tile, true).unwrap();

        assert!(sql.starts_with("ST_MakeEnvelope(-179.99999"));
        assert!(sql.ends_with(",4326)"));
    }

    #[test]
    fn test_unknown_tokens_are_kept() {
        let layer = layer(WEB_MERCATOR);
        let tile = Tile::new(3, 2, 1, 0.0, WEB_MERCATOR);
        let template = "SELECT * FROM foo WHERE name = !name! AND kind != !Kind!";

        let once = replace_tokens(template, &layer, &tile, false).unwrap();
        assert_eq!(
            "SELECT * FROM foo WHERE name = !NAME! AND kind != !KIND!",
            once
        );
        assert_eq!(once, replace_tokens(&once, &layer, &tile, false).unwrap());
    }

    #[test]
    fn test_replace_tokens_errors() {
        let mut layer = layer(WEB_MERCATOR);
        let tile = Tile::new(2, 1, 1, 64.0, WEB_MERCATOR);

        match replace_tokens("SELECT * FROM foo", &layer, &tile, true) {
            Err(Error::Template(_)) => {}
            other => panic!("expected a template error, got {:?}", other),
        }
        assert_eq!(
            "SELECT * FROM foo",
            replace_tokens("SELECT * FROM foo", &layer, &tile, false).unwrap()
        );

        let outside = Tile::new(2, 9, 1, 64.0, WEB_MERCATOR);
        assert!(matches!(
            replace_tokens("!BBOX!", &layer, &outside, true),
            Err(Error::Geometry(_))
        ));

        layer.id_column = None;
        assert!(matches!(
            replace_tokens("SELECT !ID_FIELD! WHERE !BBOX!", &layer, &tile, true),
            Err(Error::Template(_))
        ));
    }

    #[test]
    fn test_token_table() {
        let table = TokenTable::builtin();
        assert!(table.contains("!bbox!"));
        assert!(table.contains(SCALE_DENOMINATOR_TOKEN));
        assert!(!table.contains("!PARAM!"));

        // A custom table only knows what it was given
        let custom = TokenTable::new().with("!ANSWER!", |_| Ok(String::from("42")));
        let sql = custom
            .replace(
                "SELECT !answer!, !ZOOM!",
                &layer(WEB_MERCATOR),
                &Tile::new(1, 0, 0, 0.0, WEB_MERCATOR),
                false,
            )
            .unwrap();
        assert_eq!("SELECT 42, !ZOOM!", sql);

        assert!(is_token("!PARAM!"));
        assert!(!is_token("!PARAM! "));
        assert!(!is_token("PARAM"));
        assert_eq!("\"we\"\"ird\"", quote_identifier("we\"ird"));
    }
}
