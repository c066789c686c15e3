
/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Broad category of a column type, reported in result descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    /// `char`, `varchar`, `text`
    String,
    /// `bytea`
    Binary,
    /// integers, floats and `numeric`
    Number,
    /// `date`, `time`, `timestamp` with and without time zone
    DateTime,
    /// `oid`
    RowId,
    /// `bool`
    Bool,
    /// `json`, `jsonb`
    Json,
    /// Type known by the server but without registered decoder.
    Other(Oid),
    /// Type oid never bound to a name.
    Unknown,
}
