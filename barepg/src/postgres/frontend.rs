//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/7.3/protocol-message-formats.html>
use bytes::{BufMut, BytesMut};

use super::Oid;
use crate::ext::{BufMutExt, StrExt, UsizeExt};

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype only, protocol 2.0 have no length prefix
    const PREFIX: usize = 1;

    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "Frontend message body size not equal to size hint"
    );
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body, excluding the message type.
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The lenght of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup packet
///
/// ```text
/// int32 length | int32 protocol | char[64] dbname | char[32] user
///              | char[64] options | char[64] unused | char[64] tty
/// ```
///
/// The startup packet has no message type, thus [`Startup`] does not implement [`FrontendProtocol`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database to connect to. Empty means the user name.
    pub database: &'a str,
    /// The database user name to connect as.
    pub user: &'a str,
    /// Command-line arguments for the backend.
    pub options: &'a str,
}

impl Startup<'_> {
    /// Size of the whole packet, including the length itself.
    pub const LEN: u32 = 296;
    /// Protocol 2.0, major version in the most significant 16 bits.
    pub const PROTOCOL: u32 = 2 << 16;

    pub const DATABASE_LEN: usize = 64;
    pub const USER_LEN: usize = 32;
    pub const OPTIONS_LEN: usize = 64;
    const UNUSED_LEN: usize = 64;
    const TTY_LEN: usize = 64;

    pub fn write(self, buf: &mut BytesMut) {
        buf.reserve(Self::LEN as usize);
        buf.put_u32(Self::LEN);
        buf.put_u32(Self::PROTOCOL);
        buf.put_fixed_string(self.database, Self::DATABASE_LEN);
        buf.put_fixed_string(self.user, Self::USER_LEN);
        buf.put_fixed_string(self.options, Self::OPTIONS_LEN);
        buf.put_fixed_string("", Self::UNUSED_LEN);
        buf.put_fixed_string("", Self::TTY_LEN);
    }
}

/// Password packet, the response to an authentication request.
///
/// Like [`Startup`], it has no message type but a length prefix instead.
#[derive(Debug)]
pub struct PasswordPacket<'a> {
    /// The password, hashed if requested.
    pub password: &'a str,
}

impl PasswordPacket<'_> {
    pub fn write(self, buf: &mut BytesMut) {
        let len = 4 + self.password.nul_string_len();
        buf.reserve(len as usize);
        buf.put_u32(len);
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a simple query
#[derive(Debug)]
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Argument of a [`FunctionCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnArg<'a> {
    /// Sent as signed 4-byte integer.
    Int(i32),
    /// Sent as unsigned 4-byte integer, such as oids.
    Oid(Oid),
    /// Sent as length and payload.
    Bytes(&'a [u8]),
}

impl FnArg<'_> {
    fn size(&self) -> u32 {
        4 + match self {
            FnArg::Int(_) | FnArg::Oid(_) => 4,
            FnArg::Bytes(b) => b.len().to_u32(),
        }
    }
}

impl From<i32> for FnArg<'_> {
    fn from(value: i32) -> Self {
        FnArg::Int(value)
    }
}

impl From<u32> for FnArg<'_> {
    fn from(value: u32) -> Self {
        FnArg::Oid(value)
    }
}

impl<'a> From<&'a [u8]> for FnArg<'a> {
    fn from(value: &'a [u8]) -> Self {
        FnArg::Bytes(value)
    }
}

/// Identifies the message as a function call.
///
/// ```text
/// 'F' | '\0' | int32 function_oid | int32 arg_count | (int32 length | bytes)*
/// ```
#[derive(Debug)]
pub struct FunctionCall<'a> {
    /// Specifies the object ID of the function to call.
    pub oid: Oid,
    /// Function arguments.
    pub args: &'a [FnArg<'a>],
}

impl FrontendProtocol for FunctionCall<'_> {
    const MSGTYPE: u8 = b'F';

    fn size_hint(&self) -> u32 {
        1 + 4 + 4 + self.args.iter().map(FnArg::size).sum::<u32>()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(b'\0');
        buf.put_u32(self.oid);
        buf.put_i32(self.args.len().to_i32());
        for arg in self.args {
            match *arg {
                FnArg::Int(i) => {
                    buf.put_i32(4);
                    buf.put_i32(i);
                },
                FnArg::Oid(oid) => {
                    buf.put_i32(4);
                    buf.put_u32(oid);
                },
                FnArg::Bytes(b) => {
                    buf.put_i32(b.len().to_i32());
                    buf.put_slice(b);
                },
            }
        }
    }
}

/// Identifies the message as a termination.
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> u32 {
        0
    }

    fn encode(self, _: impl BufMut) { }
}
