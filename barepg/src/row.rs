//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::Bytes;
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error, sync::Arc};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::{
    Value,
    common::ByteStr,
    ext::FmtExt,
    postgres::{Oid, TypeCategory},
};

/// Postgres row.
///
/// Values are already decoded by the connection [`TypeRegistry`][crate::types::TypeRegistry].
#[derive(Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len(), "RowDescription len missmatch with DataRow len");
        Self { columns, values }
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of fields/column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the row description.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns decoded values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume self into decoded values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Get a value by column position or name.
    pub fn get<I: Index>(&self, idx: I) -> Option<&Value> {
        let nth = idx.position(&self.columns).ok()?;
        self.values.get(nth)
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let nth = idx.position(&self.columns)?;
        match self.values.get(nth) {
            Some(value) => R::decode(value.clone()),
            None => Err(DecodeError::IndexOutOfBounds(nth)),
        }
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }

    /// Iterate over column and value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.columns.iter().zip(&self.values)
    }
}

impl IntoIterator for Row {
    type Item = Value;

    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (col, value) in self.iter() {
            dbg.entry(&col.name, value);
        }
        dbg.finish()
    }
}

/// Postgres column description.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub(crate) name: ByteStr,
    pub(crate) oid: Oid,
    pub(crate) category: TypeCategory,
    pub(crate) size: i16,
    pub(crate) modifier: i32,
}

impl Column {
    /// Returns column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns column [`Oid`].
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Returns the type category resolved from the column oid.
    pub const fn category(&self) -> TypeCategory {
        self.category
    }

    /// Returns the data type size, negative for variable-width types.
    pub const fn size(&self) -> i16 {
        self.size
    }

    /// Returns the type modifier.
    pub const fn modifier(&self) -> i32 {
        self.modifier
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from a decoded [`Value`].
pub trait Decode: Sized {
    /// Try decode self from value.
    fn decode(value: Value) -> Result<Self, DecodeError>;
}

impl Decode for Value {
    fn decode(value: Value) -> Result<Self, DecodeError> {
        Ok(value)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            value => T::decode(value).map(Some),
        }
    }
}

macro_rules! decode {
    ($ty:ty, $name:literal, $($pat:pat => $body:expr),* $(,)?) => {
        impl Decode for $ty {
            fn decode(value: Value) -> Result<Self, DecodeError> {
                match value {
                    $($pat => $body,)*
                    Value::Null => Err(DecodeError::Null),
                    value => Err(DecodeError::TypeMismatch { expected: $name, found: value.kind_name() }),
                }
            }
        }
    };
}

decode!(bool, "bool", Value::Bool(b) => Ok(b));
decode!(i16, "int",
    Value::Int(i) => i16::try_from(i).map_err(|_| DecodeError::invalid("int2", i.to_string())),
);
decode!(i32, "int",
    Value::Int(i) => Ok(i),
    Value::BigInt(i) => i32::try_from(i).map_err(|_| DecodeError::invalid("int4", i.to_string())),
);
decode!(i64, "bigint",
    Value::Int(i) => Ok(i as i64),
    Value::BigInt(i) => Ok(i),
);
decode!(u32, "oid",
    Value::Int(i) => u32::try_from(i).map_err(|_| DecodeError::invalid("oid", i.to_string())),
    Value::BigInt(i) => u32::try_from(i).map_err(|_| DecodeError::invalid("oid", i.to_string())),
);
decode!(f64, "float",
    Value::Float(v) => Ok(v),
    Value::Int(i) => Ok(i as f64),
    Value::Numeric(n) => n.parse().map_err(|_| DecodeError::invalid("numeric", n)),
);
decode!(String, "text",
    Value::Text(s) => Ok(s),
    Value::Numeric(s) => Ok(s),
);
decode!(Bytes, "bytes", Value::Bytes(b) => Ok(b));
decode!(Vec<u8>, "bytes", Value::Bytes(b) => Ok(b.into()));
decode!(Date, "date",
    Value::Date(d) => Ok(d),
    Value::Timestamp(ts) => Ok(ts.date()),
);
decode!(Time, "time",
    Value::Time(t) => Ok(t),
    Value::TimeTz(t, _) => Ok(t),
);
decode!(PrimitiveDateTime, "timestamp", Value::Timestamp(ts) => Ok(ts));
decode!(OffsetDateTime, "timestamptz", Value::TimestampTz(ts) => Ok(ts));
#[cfg(feature = "json")]
decode!(serde_json::Value, "json", Value::Json(j) => Ok(j));

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the column position.
    fn position(self, columns: &[Column]) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, columns: &[Column]) -> Result<usize, DecodeError> {
        match self < columns.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, columns: &[Column]) -> Result<usize, DecodeError> {
        columns
            .iter()
            .position(|col| col.name == self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Decoded value is of a different kind than requested.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// Row is null.
    Null,
    /// Server text could not be parsed as its declared type.
    Invalid {
        ty: &'static str,
        value: String,
    },
    /// Failed to deserialize using `serde_json`.
    #[cfg(feature = "json")]
    Json(serde_json::error::Error),
}

impl DecodeError {
    pub(crate) fn invalid(ty: &'static str, value: impl AsRef<[u8]>) -> Self {
        Self::Invalid { ty, value: value.as_ref().lossy().to_string() }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::TypeMismatch { expected, found } => write!(f, "expected {expected}, found {found}"),
            Self::Null => write!(f, "unexpected NULL value"),
            Self::Invalid { ty, value } => write!(f, "invalid {ty}: {value:?}"),
            #[cfg(feature = "json")]
            Self::Json(e) => write!(f, "{e}"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
#[cfg(feature = "json")]
from!(<serde_json::error::Error>e => Self::Json(e));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
