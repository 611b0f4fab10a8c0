//! Decoder for the bencode format used by `.torrent` files.
//!
//! The decoder is a pure recursive descent over a cursor, it does not keep any
//! state between calls and never returns a partially decoded tree. Encoding is
//! done with [`bendy`], which is only needed to produce metainfo files (tests,
//! tooling), the client itself never writes bencode.
use std::collections::BTreeMap;

use bendy::encoding::{self, SingleItemEncoder, ToBencode};
use thiserror::Error;

/// Containers nested deeper than this are rejected, a `.torrent` file never
/// comes close to it.
pub const MAX_DEPTH: usize = 64;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    /// Keys are kept sorted, a duplicated key keeps the last value.
    Dict(BTreeMap<Vec<u8>, Value>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("invalid leading byte 0x{byte:02x} at byte {pos}")]
    InvalidPrefix { byte: u8, pos: usize },

    #[error("missing `{terminator}` terminator for the value at byte {pos}")]
    MissingTerminator { terminator: char, pos: usize },

    #[error("invalid integer at byte {0}")]
    InvalidInteger(usize),

    #[error("invalid string length at byte {0}")]
    InvalidLength(usize),

    #[error(
        "string at byte {pos} declares {len} bytes but only {remaining} are \
         left"
    )]
    LengthOverrun { pos: usize, len: usize, remaining: usize },

    #[error("dictionary key at byte {0} is not a byte string")]
    InvalidDictKey(usize),

    #[error("values are nested too deeply at byte {0}")]
    TooDeep(usize),

    #[error("trailing data after the root value at byte {0}")]
    TrailingData(usize),
}

/// Decode `buf` into a single [`Value`], the whole buffer must be consumed.
pub fn decode(buf: &[u8]) -> Result<Value, ParseError> {
    let (value, consumed) = decode_prefix(buf)?;

    if consumed != buf.len() {
        return Err(ParseError::TrailingData(consumed));
    }

    Ok(value)
}

/// Decode the first value of `buf`, returning it with the number of bytes
/// consumed.
pub fn decode_prefix(buf: &[u8]) -> Result<(Value, usize), ParseError> {
    let mut cursor = Cursor { buf, pos: 0 };
    let value = cursor.value(0)?;
    Ok((value, cursor.pos))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Result<u8, ParseError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(ParseError::UnexpectedEof(self.pos))
    }

    fn value(&mut self, depth: usize) -> Result<Value, ParseError> {
        if depth > MAX_DEPTH {
            return Err(ParseError::TooDeep(self.pos));
        }

        match self.peek()? {
            b'i' => self.int().map(Value::Int),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            byte => Err(ParseError::InvalidPrefix { byte, pos: self.pos }),
        }
    }

    /// Read until `terminator`, returning the bytes before it and moving the
    /// cursor past it.
    fn until(&mut self, terminator: u8) -> Result<&'a [u8], ParseError> {
        let buf = self.buf;
        let start = self.pos;
        let rel = buf[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or(ParseError::MissingTerminator {
                terminator: terminator as char,
                pos: start,
            })?;

        self.pos = start + rel + 1;
        Ok(&buf[start..start + rel])
    }

    fn int(&mut self) -> Result<i64, ParseError> {
        let start = self.pos;
        // skip `i`
        self.pos += 1;
        let digits = self.until(b'e')?;

        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(ParseError::InvalidInteger(start));
        }

        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(ParseError::InvalidInteger(start))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, ParseError> {
        let start = self.pos;
        let digits = self.until(b':')?;

        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(ParseError::InvalidLength(start));
        }

        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(ParseError::InvalidLength(start))?;

        let remaining = self.buf.len() - self.pos;
        if len > remaining {
            return Err(ParseError::LengthOverrun {
                pos: start,
                len,
                remaining,
            });
        }

        let bytes = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;

        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, ParseError> {
        // skip `l`
        self.pos += 1;
        let mut items = Vec::new();

        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }

        // skip `e`
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, ParseError> {
        // skip `d`
        self.pos += 1;
        let mut map = BTreeMap::new();

        while self.peek()? != b'e' {
            let key_pos = self.pos;
            if !self.peek()?.is_ascii_digit() {
                return Err(ParseError::InvalidDictKey(key_pos));
            }
            let key = self.bytes()?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }

        // skip `e`
        self.pos += 1;
        Ok(Value::Dict(map))
    }
}

impl Value {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Get the value of `key` if `self` is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Bytes(value.as_bytes().to_vec())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl ToBencode for Value {
    const MAX_DEPTH: usize = MAX_DEPTH;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> Result<(), encoding::Error> {
        match self {
            Value::Bytes(b) => encoder.emit_bytes(b),
            Value::Int(i) => encoder.emit_int(*i),
            Value::List(items) => encoder.emit_list(|e| {
                for item in items {
                    e.emit(item)?;
                }
                Ok(())
            }),
            // BTreeMap iterates in key order, which is what bencode requires
            Value::Dict(map) => encoder.emit_dict(|mut e| {
                for (k, v) in map {
                    e.emit_pair(k, v)?;
                }
                Ok(())
            }),
        }
    }
}
