use bytes::Bytes;
use std::fmt;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// A decoded column value, or a parameter to be quoted into a query.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    Bool(bool),
    /// `int2` and `int4`.
    Int(i32),
    /// `int8` and `oid`.
    BigInt(i64),
    /// `float4` and `float8`.
    Float(f64),
    /// `numeric`, kept in its exact textual form.
    Numeric(String),
    Text(String),
    /// `bytea`.
    Bytes(Bytes),
    Date(Date),
    Time(Time),
    /// `time with time zone`.
    TimeTz(Time, UtcOffset),
    /// `timestamp`.
    Timestamp(PrimitiveDateTime),
    /// `timestamp with time zone`.
    TimestampTz(OffsetDateTime),
    /// `json` and `jsonb`.
    #[cfg(feature = "json")]
    Json(serde_json::Value),
}

impl Value {
    /// Returns `true` if value is `NULL`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the variant name, used in decode errors.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeTz(..) => "timetz",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            #[cfg(feature = "json")]
            Value::Json(_) => "json",
        }
    }

    /// Returns the string slice if value is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as `i64` if value is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i as i64),
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => b.fmt(f),
            Value::Int(i) => i.fmt(f),
            Value::BigInt(i) => i.fmt(f),
            Value::Float(v) => v.fmt(f),
            Value::Numeric(n) => f.write_str(n),
            Value::Text(s) => s.fmt(f),
            Value::Bytes(b) => b.fmt(f),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::TimeTz(t, o) => write!(f, "{t} {o}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::TimestampTz(ts) => write!(f, "{ts}"),
            #[cfg(feature = "json")]
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

macro_rules! from {
    ($($ty:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

from! {
    bool => |v| Value::Bool(v);
    i16 => |v| Value::Int(v as i32);
    i32 => |v| Value::Int(v);
    u32 => |v| Value::BigInt(v as i64);
    i64 => |v| Value::BigInt(v);
    f32 => |v| Value::Float(v as f64);
    f64 => |v| Value::Float(v);
    String => |v| Value::Text(v);
    &str => |v| Value::Text(v.to_owned());
    Vec<u8> => |v| Value::Bytes(v.into());
    &[u8] => |v| Value::Bytes(Bytes::copy_from_slice(v));
    Bytes => |v| Value::Bytes(v);
    Date => |v| Value::Date(v);
    Time => |v| Value::Time(v);
    PrimitiveDateTime => |v| Value::Timestamp(v);
    OffsetDateTime => |v| Value::TimestampTz(v);
}

#[cfg(feature = "json")]
from! {
    serde_json::Value => |v| Value::Json(v);
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i32(*i),
            Value::BigInt(i) => serializer.serialize_i64(*i),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Numeric(n) => serializer.serialize_str(n),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Date(_)
            | Value::Time(_)
            | Value::TimeTz(..)
            | Value::Timestamp(_)
            | Value::TimestampTz(_) => serializer.collect_str(&crate::types::time::Iso(self)),
            #[cfg(feature = "json")]
            Value::Json(j) => j.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn option_into_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert!(Value::from(None::<String>).is_null());
    }

    #[test]
    fn integer_accessors() {
        assert_eq!(Value::from(7i16).as_i64(), Some(7));
        assert_eq!(Value::from(u32::MAX).as_i64(), Some(u32::MAX as i64));
        assert_eq!(Value::from("7").as_i64(), None);
    }
}
