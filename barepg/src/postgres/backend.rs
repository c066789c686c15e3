//! Postgres Backend Messages
//!
//! Each message is read field by field directly from the [`PgStream`],
//! since protocol 2.0 messages carry no length prefix.
use bytes::Bytes;
use std::fmt;

use super::{Oid, PgFormat, ProtocolError};
use crate::{Result, common::ByteStr, stream::PgStream};

/// A type that can be read as postgres backend message, after its message type.
pub trait BackendProtocol: Sized {
    /// Message type.
    const MSGTYPE: u8;

    /// Read the message body.
    fn read(io: &mut PgStream) -> Result<Self>;
}

/// Postgres backend messages
///
/// `AsciiRow` and `BinaryRow` are not listed, they require the preceding [`RowDescription`],
/// see [`DataRow::read`].
#[derive(Debug)]
pub enum BackendMessage {
    NotificationResponse(NotificationResponse),
    CommandComplete(CommandComplete),
    ErrorResponse(ErrorResponse),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    BackendKeyData(BackendKeyData),
    NoticeResponse(NoticeResponse),
    CursorResponse(CursorResponse),
    Authentication(Authentication),
    RowDescription(RowDescription),
    FunctionResultResponse(FunctionResultResponse),
    ReadyForQuery(ReadyForQuery),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    b'D' => "AsciiRow",
                    b'B' => "BinaryRow",
                    _ => "Unknown",
                }
            }

            /// Read a message body given its message type.
            pub fn read(msgtype: u8, io: &mut PgStream) -> Result<Self> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::read(io)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype).into()),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    NotificationResponse,
    CommandComplete,
    ErrorResponse,
    CopyInResponse,
    CopyOutResponse,
    EmptyQueryResponse,
    BackendKeyData,
    NoticeResponse,
    CursorResponse,
    Authentication,
    RowDescription,
    FunctionResultResponse,
    ReadyForQuery,
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V4 authentication is required.
    KerberosV4,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that a crypt()-encrypted password is required.
    CryptPassword {
        /// The salt to use when encrypting the password.
        salt: [u8;2],
    },
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8;4],
    },
}

impl BackendProtocol for Authentication {
    const MSGTYPE: u8 = b'R';

    fn read(io: &mut PgStream) -> Result<Self> {
        let auth = match io.read_i32()? {
            0 => Authentication::Ok,
            1 => Authentication::KerberosV4,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            4 => Authentication::CryptPassword { salt: salt(io)? },
            5 => Authentication::MD5Password { salt: salt(io)? },
            auth => return Err(ProtocolError::unknown_auth(auth).into()),
        };
        Ok(auth)
    }
}

fn salt<const N: usize>(io: &mut PgStream) -> Result<[u8;N]> {
    let mut salt = [0u8;N];
    salt.copy_from_slice(&io.read_exact(N)?);
    Ok(salt)
}

/// Identifies the message as cancellation key data.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendProtocol for BackendKeyData {
    const MSGTYPE: u8 = b'K';

    fn read(io: &mut PgStream) -> Result<Self> {
        Ok(Self {
            process_id: io.read_i32()?,
            secret_key: io.read_i32()?,
        })
    }
}

/// Identifies the message as a notification response.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: i32,
    /// The name of the condition that the notify has been raised on.
    pub channel: ByteStr,
}

impl BackendProtocol for NotificationResponse {
    const MSGTYPE: u8 = b'A';

    fn read(io: &mut PgStream) -> Result<Self> {
        Ok(Self {
            process_id: io.read_i32()?,
            channel: io.read_nul_string()?,
        })
    }
}

/// Identifies the message as a completed response.
///
/// The command tag is usually a single word that identifies which SQL command was completed,
/// followed by row counts, such as `INSERT oid rows`, `UPDATE rows` or `DELETE rows`.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag.
    pub tag: ByteStr,
}

impl BackendProtocol for CommandComplete {
    const MSGTYPE: u8 = b'C';

    fn read(io: &mut PgStream) -> Result<Self> {
        Ok(Self { tag: io.read_nul_string()? })
    }
}

/// Identifies the message as an error.
///
/// Protocol 2.0 error is a single string, usually prefixed by the severity, such as
/// `ERROR:  relation "foo" does not exist`.
#[derive(Clone)]
pub struct ErrorResponse {
    pub message: ByteStr,
}

impl ErrorResponse {
    /// Returns the severity prefix, such as `ERROR` or `FATAL`.
    pub fn severity(&self) -> Option<&str> {
        let (severity, _) = self.message.split_once(':')?;
        match severity.chars().all(|c| c.is_ascii_uppercase()) {
            true => Some(severity),
            false => None,
        }
    }

    /// Returns the message without severity prefix and trailing newline.
    pub fn message(&self) -> &str {
        let message = match self.severity() {
            Some(severity) => &self.message[severity.len() + 1..],
            None => &self.message,
        };
        message.trim()
    }
}

impl BackendProtocol for ErrorResponse {
    const MSGTYPE: u8 = b'E';

    fn read(io: &mut PgStream) -> Result<Self> {
        Ok(Self { message: io.read_nul_string()? })
    }
}

impl std::error::Error for ErrorResponse { }

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity() {
            Some(severity) => write!(f, "{severity}: {}", self.message()),
            None => f.write_str(self.message()),
        }
    }
}

impl fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A warning message.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    pub message: ByteStr,
}

impl BackendProtocol for NoticeResponse {
    const MSGTYPE: u8 = b'N';

    fn read(io: &mut PgStream) -> Result<Self> {
        Ok(Self { message: io.read_nul_string()? })
    }
}

impl fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message.trim_end())
    }
}

/// Identifies the message as a cursor response, sent before the rows of a query.
#[derive(Debug)]
pub struct CursorResponse {
    /// The name of the cursor, `blank` if the cursor is implicit.
    pub name: ByteStr,
}

impl BackendProtocol for CursorResponse {
    const MSGTYPE: u8 = b'P';

    fn read(io: &mut PgStream) -> Result<Self> {
        Ok(Self { name: io.read_nul_string()? })
    }
}

/// Identifies the message as a response to an empty query string.
#[derive(Debug)]
pub struct EmptyQueryResponse;

impl BackendProtocol for EmptyQueryResponse {
    const MSGTYPE: u8 = b'I';

    fn read(io: &mut PgStream) -> Result<Self> {
        // an unused empty string
        io.read_until(b'\0')?;
        Ok(Self)
    }
}

/// Identifies the field of a [`RowDescription`].
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// The object ID of the field's data type.
    pub oid: Oid,
    /// The data type size, negative values denote variable-width types.
    pub size: i16,
    /// The type modifier, the meaning of the modifier is type-specific.
    pub modifier: i32,
}

/// Identifies the message as a row description.
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl BackendProtocol for RowDescription {
    const MSGTYPE: u8 = b'T';

    fn read(io: &mut PgStream) -> Result<Self> {
        let len = io.read_i16()?;
        if len < 0 {
            return Err(ProtocolError::malformed("negative field count in row description").into());
        }
        let mut fields = Vec::with_capacity(len as usize);
        for _ in 0..len {
            fields.push(FieldDescription {
                name: io.read_nul_string()?,
                oid: io.read_u32()?,
                size: io.read_i16()?,
                modifier: io.read_i32()?,
            });
        }
        Ok(Self { fields })
    }
}

/// Identifies the message as a data row, either `AsciiRow` or `BinaryRow`.
#[derive(Debug)]
pub struct DataRow {
    /// Raw field payload, [`None`] for `NULL`.
    pub values: Vec<Option<Bytes>>,
}

impl DataRow {
    /// Read a data row of `field_len` fields.
    ///
    /// The row starts with a bitmap of `ceil(field_len / 8)` bytes, most significant bit
    /// first starting at the leftmost field. A set bit means the field is present.
    pub fn read(io: &mut PgStream, field_len: usize, format: PgFormat) -> Result<Self> {
        let bitmap = io.read_exact(field_len.div_ceil(8))?;
        let mut values = Vec::with_capacity(field_len);

        for i in 0..field_len {
            if bitmap[i / 8] & (0x80 >> (i % 8)) == 0 {
                values.push(None);
                continue;
            }
            let Some(len) = format.payload_len(io.read_i32()?) else {
                return Err(ProtocolError::malformed("invalid field length in data row").into());
            };
            values.push(Some(io.read_exact(len)?));
        }

        Ok(Self { values })
    }
}

/// Identifies the message as a Start Copy In response.
///
/// The frontend must now send copy-in data.
#[derive(Debug)]
pub struct CopyInResponse;

impl BackendProtocol for CopyInResponse {
    const MSGTYPE: u8 = b'G';

    fn read(_: &mut PgStream) -> Result<Self> {
        Ok(Self)
    }
}

/// Identifies the message as a Start Copy Out response.
///
/// This message will be followed by copy-out data.
#[derive(Debug)]
pub struct CopyOutResponse;

impl BackendProtocol for CopyOutResponse {
    const MSGTYPE: u8 = b'H';

    fn read(_: &mut PgStream) -> Result<Self> {
        Ok(Self)
    }
}

/// Identifies the message as a function call result.
///
/// ```text
/// 'V' | ('G' | int32 length | bytes)? | '0'
/// ```
#[derive(Debug)]
pub struct FunctionResultResponse {
    pub value: Option<Bytes>,
}

impl BackendProtocol for FunctionResultResponse {
    const MSGTYPE: u8 = b'V';

    fn read(io: &mut PgStream) -> Result<Self> {
        let mut value = None;
        loop {
            match io.read_u8()? {
                b'0' => break,
                b'G' => {
                    let len = io.read_i32()?;
                    if len < 0 {
                        return Err(ProtocolError::malformed("negative function result length").into());
                    }
                    value = Some(io.read_exact(len as usize)?);
                },
                ch => {
                    return Err(ProtocolError::malformed(format!(
                        "unexpected byte `{}` in function call response",
                        ch.escape_ascii(),
                    )).into());
                },
            }
        }
        Ok(Self { value })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery;

impl BackendProtocol for ReadyForQuery {
    const MSGTYPE: u8 = b'Z';

    fn read(_: &mut PgStream) -> Result<Self> {
        Ok(Self)
    }
}
