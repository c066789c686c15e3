//! Server type registry.
//!
//! Every [`Connection`][crate::Connection] owns a [`TypeRegistry`]. Built-in decoders are
//! registered by type name, then bound to their oids from the server catalog at connect, so
//! that a later row description can locate the decoder of each column.
//!
//! Outgoing values are quoted into SQL literals, consulting user registered encoders
//! before the built-in rules, see [`TypeRegistry::encode`].
use bytes::Bytes;
use std::collections::HashMap;

use crate::{
    Value,
    encode,
    postgres::{Oid, TypeCategory},
    row::DecodeError,
};

#[cfg(feature = "json")]
mod json;
#[cfg(feature = "json")]
pub use json::Json;

pub(crate) mod time;

/// Function that decodes a raw server field into a [`Value`].
pub type Decoder = fn(&[u8]) -> Result<Value, DecodeError>;

/// Function that renders a [`Value`] as SQL literal.
pub type Encoder = fn(&Value) -> String;

/// Predicate selecting values handled by an [`Encoder`].
pub type Matcher = fn(&Value) -> bool;

/// A registered server type.
#[derive(Debug, Clone)]
pub struct PgTypeEntry {
    name: String,
    decoder: Decoder,
    category: TypeCategory,
    oid: Option<Oid>,
}

impl PgTypeEntry {
    /// Returns the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type category.
    pub const fn category(&self) -> TypeCategory {
        self.category
    }

    /// Returns the type oid, if bound.
    pub const fn oid(&self) -> Option<Oid> {
        self.oid
    }

    pub(crate) fn decoder(&self) -> Decoder {
        self.decoder
    }

    /// Decode raw field using this type decoder.
    pub fn decode(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        (self.decoder)(raw)
    }
}

/// Oid to decoder mapping.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    by_name: HashMap<String, PgTypeEntry>,
    by_oid: HashMap<Oid, String>,
    encoders: Vec<(Matcher, Encoder)>,
    unknown: PgTypeEntry,
}

impl TypeRegistry {
    /// Create registry without any registered type.
    ///
    /// Every oid resolves to the opaque text decoder.
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
            by_oid: HashMap::new(),
            encoders: Vec::new(),
            unknown: PgTypeEntry {
                name: String::from("unknown"),
                decoder: decode_text,
                category: TypeCategory::Unknown,
                oid: None,
            },
        }
    }

    /// Create registry with built-in types registered.
    pub fn new() -> Self {
        let mut me = Self::empty();
        me.register(&["int2", "int4"], decode_int, TypeCategory::Number);
        me.register(&["int8"], decode_bigint, TypeCategory::Number);
        me.register(&["float4", "float8"], decode_float, TypeCategory::Number);
        me.register(&["numeric"], decode_numeric, TypeCategory::Number);
        me.register(&["bool"], decode_bool, TypeCategory::Bool);
        me.register(&["bytea"], decode_bytea, TypeCategory::Binary);
        me.register(&["char", "bpchar", "varchar", "text", "name"], decode_text, TypeCategory::String);
        me.register(&["date"], time::decode_date, TypeCategory::DateTime);
        me.register(&["time", "timetz"], time::decode_time, TypeCategory::DateTime);
        me.register(&["timestamp", "timestamptz"], time::decode_timestamp, TypeCategory::DateTime);
        me.register(&["oid"], decode_bigint, TypeCategory::RowId);
        #[cfg(feature = "json")]
        me.register(&["json", "jsonb"], json::decode_json, TypeCategory::Json);
        me
    }

    /// Register a decoder for type names.
    ///
    /// Replacing a registered name keeps its oid binding.
    pub fn register(&mut self, names: &[&str], decoder: Decoder, category: TypeCategory) {
        for &name in names {
            let oid = self.by_name.get(name).and_then(|e| e.oid);
            self.by_name.insert(name.to_owned(), PgTypeEntry {
                name: name.to_owned(),
                decoder,
                category,
                oid,
            });
        }
    }

    /// Link an oid to a type name.
    ///
    /// Unregistered names are registered with the opaque text decoder.
    pub fn bind_oid(&mut self, oid: Oid, name: &str) {
        let entry = self
            .by_name
            .entry(name.to_owned())
            .or_insert_with(|| PgTypeEntry {
                name: name.to_owned(),
                decoder: decode_text,
                category: TypeCategory::Other(oid),
                oid: None,
            });
        entry.oid = Some(oid);
        self.by_oid.insert(oid, name.to_owned());
    }

    /// Returns the entry bound to `oid`, or the opaque text entry if oid was never bound.
    pub fn resolve(&self, oid: Oid) -> &PgTypeEntry {
        self.by_oid
            .get(&oid)
            .and_then(|name| self.by_name.get(name))
            .unwrap_or(&self.unknown)
    }

    /// Returns the entry registered by type name.
    pub fn get(&self, name: &str) -> Option<&PgTypeEntry> {
        self.by_name.get(name)
    }

    /// Register an encoder, consulted before the built-in rules.
    ///
    /// Encoders are checked in registration order, the first matching one wins.
    pub fn register_encoder(&mut self, matches: Matcher, encoder: Encoder) {
        self.encoders.push((matches, encoder));
    }

    /// Render a value as SQL literal.
    pub fn encode(&self, value: &Value) -> String {
        for (matches, encoder) in &self.encoders {
            if matches(value) {
                return encoder(value);
            }
        }
        encode::literal(value)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn utf8(raw: &[u8]) -> Result<&str, DecodeError> {
    Ok(std::str::from_utf8(raw)?)
}

fn decode_text(raw: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Text(utf8(raw)?.to_owned()))
}

fn decode_int(raw: &[u8]) -> Result<Value, DecodeError> {
    let s = utf8(raw)?;
    s.trim().parse().map(Value::Int).map_err(|_| DecodeError::invalid("int4", raw))
}

fn decode_bigint(raw: &[u8]) -> Result<Value, DecodeError> {
    let s = utf8(raw)?;
    s.trim().parse().map(Value::BigInt).map_err(|_| DecodeError::invalid("int8", raw))
}

fn decode_float(raw: &[u8]) -> Result<Value, DecodeError> {
    let f = match utf8(raw)?.trim() {
        "NaN" => f64::NAN,
        "Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        s => s.parse().map_err(|_| DecodeError::invalid("float8", raw))?,
    };
    Ok(Value::Float(f))
}

fn decode_numeric(raw: &[u8]) -> Result<Value, DecodeError> {
    let s = utf8(raw)?.trim();
    let valid = s == "NaN"
        || s.strip_prefix('-').unwrap_or(s).bytes().all(|b| b.is_ascii_digit() || b == b'.');
    match valid && !s.is_empty() {
        true => Ok(Value::Numeric(s.to_owned())),
        false => Err(DecodeError::invalid("numeric", raw)),
    }
}

fn decode_bool(raw: &[u8]) -> Result<Value, DecodeError> {
    match raw {
        b"t" => Ok(Value::Bool(true)),
        b"f" => Ok(Value::Bool(false)),
        _ => Err(DecodeError::invalid("bool", raw)),
    }
}

/// Decode both the `escape` and the `hex` bytea output format.
fn decode_bytea(raw: &[u8]) -> Result<Value, DecodeError> {
    if let Some(hex) = raw.strip_prefix(b"\\x") {
        return decode_bytea_hex(hex).ok_or_else(|| DecodeError::invalid("bytea", raw));
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(d0 @ b'0'..=b'3') => {
                let d1 = iter.next().filter(|d| matches!(d, b'0'..=b'7'));
                let d2 = iter.next().filter(|d| matches!(d, b'0'..=b'7'));
                let (Some(d1), Some(d2)) = (d1, d2) else {
                    return Err(DecodeError::invalid("bytea", raw));
                };
                out.push((d0 - b'0') << 6 | (d1 - b'0') << 3 | (d2 - b'0'));
            }
            _ => return Err(DecodeError::invalid("bytea", raw)),
        }
    }
    Ok(Value::Bytes(Bytes::from(out)))
}

fn decode_bytea_hex(hex: &[u8]) -> Option<Value> {
    fn nibble(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }
    if hex.len() % 2 != 0 {
        return None;
    }
    let out = hex
        .chunks_exact(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect::<Option<Vec<u8>>>()?;
    Some(Value::Bytes(out.into()))
}
