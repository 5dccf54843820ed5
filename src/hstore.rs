//! Parsing of PostgreSQL `hstore` payloads.
//!
//! Depending on how a row was fetched, an hstore column arrives either in its
//! text form (`"key"=>"value", "other"=>NULL`) or in the binary wire format
//! (a pair count followed by length-prefixed keys and values).

use std::iter::Peekable;
use std::str::Chars;

/// A single hstore entry. Values may be SQL NULL.
pub type Pair = (String, Option<String>);

/// Parses the text representation of an hstore.
pub fn parse_text(input: &str) -> Result<Vec<Pair>, String> {
    let mut parser = TextParser {
        chars: input.chars().peekable(),
    };
    let mut pairs = Vec::new();

    parser.skip_whitespace();
    if parser.chars.peek().is_none() {
        return Ok(pairs);
    }

    loop {
        let (key, _) = parser.item(true)?;
        parser.skip_whitespace();
        parser.expect('=')?;
        parser.expect('>')?;
        parser.skip_whitespace();
        let (value, quoted) = parser.item(false)?;
        let value = if !quoted && value.eq_ignore_ascii_case("NULL") {
            None
        } else {
            Some(value)
        };
        pairs.push((key, value));

        parser.skip_whitespace();
        match parser.chars.next() {
            None => return Ok(pairs),
            Some(',') => parser.skip_whitespace(),
            Some(c) => return Err(format!("unexpected {:?} after value", c)),
        }
    }
}

struct TextParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl TextParser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected {:?}, found {:?}", expected, c)),
            None => Err(format!("expected {:?}, found end of input", expected)),
        }
    }

    /// Reads a quoted or bare item. Returns the text and whether it was quoted.
    fn item(&mut self, is_key: bool) -> Result<(String, bool), String> {
        let mut text = String::new();

        if self.chars.next_if_eq(&'"').is_some() {
            loop {
                match self.chars.next() {
                    Some('\\') => match self.chars.next() {
                        Some(c) => text.push(c),
                        None => return Err(String::from("unterminated escape")),
                    },
                    Some('"') => return Ok((text, true)),
                    Some(c) => text.push(c),
                    None => return Err(String::from("unterminated quoted string")),
                }
            }
        }

        while let Some(c) = self
            .chars
            .next_if(|c| !c.is_whitespace() && *c != ',' && !(is_key && *c == '='))
        {
            text.push(c);
        }

        if text.is_empty() {
            let what = if is_key { "key" } else { "value" };
            Err(format!("expected a {}", what))
        } else {
            Ok((text, false))
        }
    }
}

/// Parses the binary wire representation of an hstore.
pub fn parse_binary(input: &[u8]) -> Result<Vec<Pair>, String> {
    let mut cursor = input;

    let count = read_length(&mut cursor)?
        .ok_or_else(|| String::from("negative pair count"))?;
    let mut pairs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let key = read_string(&mut cursor)?.ok_or_else(|| String::from("NULL key"))?;
        let value = read_string(&mut cursor)?;
        pairs.push((key, value));
    }

    if cursor.is_empty() {
        Ok(pairs)
    } else {
        Err(format!("{} trailing bytes", cursor.len()))
    }
}

/// Reads a big-endian i32 length. Negative lengths mean NULL.
fn read_length(cursor: &mut &[u8]) -> Result<Option<usize>, String> {
    if cursor.len() < 4 {
        return Err(String::from("truncated length"));
    }
    let (head, rest) = cursor.split_at(4);
    *cursor = rest;

    let length = i32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    Ok(usize::try_from(length).ok())
}

fn read_string(cursor: &mut &[u8]) -> Result<Option<String>, String> {
    let length = match read_length(cursor)? {
        Some(length) => length,
        None => return Ok(None),
    };
    if cursor.len() < length {
        return Err(format!("truncated string of length {}", length));
    }
    let (head, rest) = cursor.split_at(length);
    *cursor = rest;

    String::from_utf8(head.to_vec())
        .map(Some)
        .map_err(|e| format!("invalid UTF-8: {}", e))
}
