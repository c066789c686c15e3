/// Postgres data row format.
///
/// Protocol 2.0 decides the format by the message type of the row itself,
/// [`Text`][t] rows use `D` (`AsciiRow`), [`Binary`][b] rows use `B` (`BinaryRow`).
///
/// [t]: PgFormat::Text
/// [b]: PgFormat::Binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    /// Rows returned from ordinary queries.
    ///
    /// The length prefix of each field includes the four bytes of the length itself.
    Text,
    /// Rows returned from a binary cursor.
    ///
    /// The length prefix of each field is the payload size only.
    Binary,
}

impl PgFormat {
    /// Returns the message type of a row in this format.
    pub const fn msgtype(&self) -> u8 {
        match self {
            PgFormat::Text => b'D',
            PgFormat::Binary => b'B',
        }
    }

    /// Returns the payload size of a field given its length prefix.
    ///
    /// Returns [`None`] if the length prefix is out of range.
    pub fn payload_len(&self, len: i32) -> Option<usize> {
        let len = match self {
            PgFormat::Text => len.checked_sub(4)?,
            PgFormat::Binary => len,
        };
        usize::try_from(len).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_len() {
        assert_eq!(PgFormat::Text.payload_len(9), Some(5));
        assert_eq!(PgFormat::Text.payload_len(4), Some(0));
        assert_eq!(PgFormat::Text.payload_len(3), None);
        assert_eq!(PgFormat::Text.payload_len(i32::MIN), None);
        assert_eq!(PgFormat::Binary.payload_len(5), Some(5));
        assert_eq!(PgFormat::Binary.payload_len(-1), None);
    }
}
