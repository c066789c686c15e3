//! Parameter quoting.
//!
//! Protocol 2.0 has no bind message, parameters are quoted as SQL literals
//! and substituted into the query text.
//!
//! Placeholders are `%s` for [positional][Params::positional] parameters and
//! `%(name)s` for [named][Params::named] parameters. A literal percent is written as `%%`.
//!
//! ```
//! use barepg::encode::Params;
//! use barepg::types::TypeRegistry;
//!
//! let params = Params::positional().bind(420).bind("it's");
//! let sql = params.substitute("SELECT %s, %s", &TypeRegistry::new()).unwrap();
//! assert_eq!(sql, r"SELECT 420, E'it\x27s'");
//! ```
use std::fmt::Write;

use crate::{Result, Value, common::ByteStr, types::TypeRegistry};

/// Returns the built-in SQL literal of a value.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => String::from("NULL"),
        Value::Bool(true) => String::from("TRUE"),
        Value::Bool(false) => String::from("FALSE"),
        Value::Int(i) => signed(*i < 0, itoa::Buffer::new().format(*i)),
        Value::BigInt(i) => signed(*i < 0, itoa::Buffer::new().format(*i)),
        Value::Float(f) if f.is_nan() => String::from("'NaN'::float8"),
        Value::Float(f) if f.is_infinite() => match f.is_sign_positive() {
            true => String::from("'Infinity'::float8"),
            false => String::from("'-Infinity'::float8"),
        },
        Value::Float(f) => signed(f.is_sign_negative(), &format!("{f:?}")),
        Value::Numeric(n) => format!("{}::numeric", escape_text(n.as_bytes())),
        Value::Text(text) => escape_text(text.as_bytes()),
        Value::Bytes(bytes) => escape_bytea(bytes),
        #[cfg(feature = "json")]
        Value::Json(json) => format!("{}::json", escape_text(json.to_string().as_bytes())),
        temporal => match crate::types::time::cast(temporal) {
            Some(cast) => format!("'{}'::{cast}", crate::types::time::Iso(temporal)),
            None => String::from("NULL"),
        },
    }
}

/// Negative numbers are parenthesized, so a preceding `-` does not start a comment.
fn signed(negative: bool, number: &str) -> String {
    match negative {
        true => format!("({number})"),
        false => number.to_owned(),
    }
}

fn needs_escape(b: u8) -> bool {
    matches!(b, 0x00..=0x1f | b'\'' | b'\\' | 0x7f..=0xff)
}

/// `E'...'` string, control, quote, backslash and non-ascii bytes written as `\xNN`.
fn escape_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push_str("E'");
    for &b in bytes {
        match needs_escape(b) {
            true => { let _ = write!(out, "\\x{b:02x}"); },
            false => out.push(b as char),
        }
    }
    out.push('\'');
    out
}

/// `E'...'::bytea` string, escaped bytes written as `\\ooo`.
fn escape_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 10);
    out.push_str("E'");
    for &b in bytes {
        match needs_escape(b) {
            true => { let _ = write!(out, "\\\\{b:03o}"); },
            false => out.push(b as char),
        }
    }
    out.push_str("'::bytea");
    out
}

/// Query parameters.
#[derive(Debug, Clone)]
pub enum Params {
    /// Substituted into `%s` placeholders, in order.
    Positional(Vec<Value>),
    /// Substituted into `%(name)s` placeholders.
    Named(Vec<(ByteStr, Value)>),
}

impl Params {
    /// Create empty positional parameters.
    pub fn positional() -> Self {
        Self::Positional(Vec::new())
    }

    /// Create empty named parameters.
    pub fn named() -> Self {
        Self::Named(Vec::new())
    }

    /// Bind next positional parameter.
    ///
    /// # Panics
    ///
    /// Panics if parameters is [`Params::Named`].
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        match &mut self {
            Self::Positional(values) => values.push(value.into()),
            Self::Named(_) => panic!("cannot bind positional parameter to named parameters"),
        }
        self
    }

    /// Set named parameter, replacing previous value of the same name.
    ///
    /// # Panics
    ///
    /// Panics if parameters is [`Params::Positional`].
    pub fn set(mut self, name: impl Into<ByteStr>, value: impl Into<Value>) -> Self {
        let name = name.into();
        match &mut self {
            Self::Named(values) => match values.iter_mut().find(|(k, _)| *k == name) {
                Some((_, v)) => *v = value.into(),
                None => values.push((name, value.into())),
            },
            Self::Positional(_) => panic!("cannot set named parameter to positional parameters"),
        }
        self
    }

    /// Substitute placeholders in `sql` with quoted parameters.
    pub fn substitute(&self, sql: &str, types: &TypeRegistry) -> Result<String> {
        let mut out = String::with_capacity(sql.len());
        let mut positional = 0;
        let mut rest = sql;

        while let Some(i) = rest.find('%') {
            out.push_str(&rest[..i]);
            rest = &rest[i + 1..];

            if let Some(tail) = rest.strip_prefix('%') {
                out.push('%');
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('s') {
                let Self::Positional(values) = self else {
                    return Err(crate::Error::programming("positional placeholder in query with named parameters"));
                };
                let Some(value) = values.get(positional) else {
                    return Err(crate::Error::programming(format!(
                        "not enough parameters, query expects more than {}",
                        values.len(),
                    )));
                };
                out.push_str(&types.encode(value));
                positional += 1;
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('(') {
                let Some((name, tail)) = tail.split_once(")s") else {
                    return Err(crate::Error::programming("unterminated named placeholder"));
                };
                let Self::Named(values) = self else {
                    return Err(crate::Error::programming("named placeholder in query with positional parameters"));
                };
                let Some((_, value)) = values.iter().find(|(k, _)| k == name) else {
                    return Err(crate::Error::programming(format!("missing named parameter `{name}`")));
                };
                out.push_str(&types.encode(value));
                rest = tail;
            } else {
                return Err(crate::Error::programming(format!(
                    "unsupported format character in query at byte {}",
                    sql.len() - rest.len() - 1,
                )));
            }
        }

        out.push_str(rest);

        if let Self::Positional(values) = self {
            if positional != values.len() {
                return Err(crate::Error::programming(format!(
                    "query expects {positional} parameters, {} given",
                    values.len(),
                )));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;
    use bytes::Bytes;
    use time::macros::{date, datetime, offset, time};

    fn is_programming(err: crate::Error) -> bool {
        matches!(err.kind(), ErrorKind::Programming(_))
    }

    #[test]
    fn literals() {
        assert_eq!(literal(&Value::Null), "NULL");
        assert_eq!(literal(&Value::Bool(false)), "FALSE");
        assert_eq!(literal(&Value::Int(i32::MIN)), "(-2147483648)");
        assert_eq!(literal(&Value::BigInt(-1)), "(-1)");
        assert_eq!(literal(&Value::Float(-0.5)), "(-0.5)");
        assert_eq!(literal(&Value::BigInt(i64::MAX)), "9223372036854775807");
        assert_eq!(literal(&Value::Float(1.0)), "1.0");
        assert_eq!(literal(&Value::Float(f64::NEG_INFINITY)), "'-Infinity'::float8");
        assert_eq!(literal(&Value::from("a'b\\c\n")), r"E'a\x27b\x5cc\x0a'");
        assert_eq!(literal(&Value::from("é")), r"E'\xc3\xa9'");
        assert_eq!(
            literal(&Value::Bytes(Bytes::from_static(b"a\0'\xff"))),
            r"E'a\\000\\047\\377'::bytea",
        );
        assert_eq!(literal(&Value::Date(date!(2024-01-02))), "'2024-01-02'::date");
        assert_eq!(
            literal(&Value::TimeTz(time!(01:02:03), offset!(-05:00))),
            "'01:02:03-05:00'::time with time zone",
        );
        assert_eq!(
            literal(&Value::Timestamp(datetime!(2024-01-02 03:04:05))),
            "'2024-01-02 03:04:05'::timestamp",
        );
    }

    /// Text output of a backend evaluating the literal.
    fn evaluate(literal: &str) -> Vec<u8> {
        let literal = literal
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(literal);
        let quoted = match literal.rsplit_once("'::") {
            Some((quoted, _cast)) => format!("{quoted}'"),
            None => literal.to_owned(),
        };
        match quoted.as_str() {
            "TRUE" => return b"t".to_vec(),
            "FALSE" => return b"f".to_vec(),
            _ => {},
        }
        if let Some(escaped) = quoted.strip_prefix("E'").and_then(|s| s.strip_suffix('\'')) {
            let mut out = Vec::new();
            let mut bytes = escaped.bytes();
            while let Some(b) = bytes.next() {
                match (b, bytes.clone().next()) {
                    (b'\\', Some(b'x')) => {
                        bytes.next();
                        let hex = [bytes.next().unwrap(), bytes.next().unwrap()];
                        out.push(u8::from_str_radix(std::str::from_utf8(&hex).unwrap(), 16).unwrap());
                    },
                    (b'\\', Some(b'\\')) => {
                        bytes.next();
                        out.push(b'\\');
                    },
                    (b, _) => out.push(b),
                }
            }
            return out;
        }
        match quoted.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            Some(unquoted) => unquoted.as_bytes().to_vec(),
            None => quoted.into_bytes(),
        }
    }

    #[test]
    fn round_trip() {
        let types = TypeRegistry::new();
        let cases = [
            ("int4", Value::Int(i32::MIN)),
            ("int4", Value::Int(i32::MAX)),
            ("int8", Value::BigInt(i64::MIN)),
            ("float8", Value::Float(-0.1)),
            ("float8", Value::Float(1e300)),
            ("float8", Value::Float(f64::INFINITY)),
            ("numeric", Value::Numeric("-12345.678900".into())),
            ("bool", Value::Bool(true)),
            ("bool", Value::Bool(false)),
            ("text", Value::from("it's a \\ 'quoted' é\n")),
            ("bytea", Value::Bytes(Bytes::from_static(b"\0nul\xff\x80'\\high"))),
            ("date", Value::Date(date!(1999-12-31))),
            ("time", Value::Time(time!(23:59:59.123456))),
            ("timetz", Value::TimeTz(time!(01:02:03), offset!(+05:30))),
            ("timetz", Value::TimeTz(time!(01:02:03), offset!(-03:00))),
            ("timestamp", Value::Timestamp(datetime!(2024-02-29 12:00:00.5))),
            ("timestamptz", Value::TimestampTz(datetime!(2024-02-29 12:00:00 +07:00))),
        ];
        for (name, value) in cases {
            let raw = evaluate(&literal(&value));
            let decoded = types.get(name).unwrap().decode(&raw).unwrap();
            assert_eq!(decoded, value, "{name}: {}", String::from_utf8_lossy(&raw));
        }
    }

    #[test]
    fn numeric_is_quoted() {
        let injected = Value::Numeric("1'::numeric; DROP TABLE users; --".into());
        assert_eq!(
            literal(&injected),
            r"E'1\x27::numeric; DROP TABLE users; --'::numeric",
        );
        assert_eq!(literal(&Value::Numeric("-1.5".into())), "E'-1.5'::numeric");
    }

    #[test]
    fn negative_after_minus() {
        let types = TypeRegistry::new();
        let sql = Params::positional()
            .bind(-5)
            .bind(-2i64)
            .bind(-0.25)
            .substitute("SELECT 10-%s, 10-%s, 1-%s", &types)
            .unwrap();
        assert_eq!(sql, "SELECT 10-(-5), 10-(-2), 1-(-0.25)");
    }

    #[test]
    fn positional() {
        let types = TypeRegistry::new();
        let sql = Params::positional()
            .bind(1)
            .bind(None::<i32>)
            .substitute("SELECT %s, %s, '100%%'", &types)
            .unwrap();
        assert_eq!(sql, "SELECT 1, NULL, '100%'");

        let few = Params::positional().bind(1).substitute("SELECT %s, %s", &types);
        assert!(is_programming(few.unwrap_err()));

        let many = Params::positional().bind(1).bind(2).substitute("SELECT %s", &types);
        assert!(is_programming(many.unwrap_err()));
    }

    #[test]
    fn named() {
        let types = TypeRegistry::new();
        let params = Params::named().set("id", 7).set("name", "x").set("id", 8);
        let sql = params
            .substitute("SELECT %(id)s, %(name)s, %(id)s", &types)
            .unwrap();
        assert_eq!(sql, "SELECT 8, E'x', 8");

        let missing = params.substitute("SELECT %(nope)s", &types);
        assert!(is_programming(missing.unwrap_err()));

        let mixed = params.substitute("SELECT %s", &types);
        assert!(is_programming(mixed.unwrap_err()));
    }

    #[test]
    fn unknown_format_character() {
        let types = TypeRegistry::new();
        let err = Params::positional().substitute("SELECT 5 % 2", &types);
        assert!(is_programming(err.unwrap_err()));
    }
}
