//! `barepg` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io};

use crate::{
    connection::{ConnectError, NotOpen, NotifyTimeout, ParseError},
    cursor::IndexError,
    postgres::{ErrorResponse, ProtocolError},
    row::DecodeError,
};

pub use crate::protocol::UnsupportedAuth;

/// A specialized [`Result`] type for `barepg` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `barepg` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub(crate) fn programming(reason: impl Into<Cow<'static,str>>) -> Self {
        ProgrammingError { reason: reason.into() }.into()
    }

    pub(crate) fn auth_failed(err: ErrorResponse) -> Self {
        ErrorKind::AuthFailed(err).into()
    }

    pub(crate) fn connect_failed(err: ConnectError) -> Self {
        ErrorKind::ConnectFailed(err).into()
    }

    pub(crate) fn copy_io(err: io::Error) -> Self {
        ErrorKind::CopyIo(err).into()
    }
}

/// All possible error kind from `barepg` library.
pub enum ErrorKind {
    /// Invalid connection string or config value.
    Config(ParseError),
    /// Socket could not be opened.
    ConnectFailed(ConnectError),
    /// Server rejected the credentials.
    AuthFailed(ErrorResponse),
    /// Server requested an authentication method this client cannot perform.
    UnsupportedAuth(UnsupportedAuth),
    /// Peer closed the connection, or send/recv failed.
    ConnectionClosed(io::Error),
    /// Copy-in source or copy-out sink failed, the connection is still usable.
    CopyIo(io::Error),
    /// Operation on a closed connection or large object.
    NotOpen(NotOpen),
    /// Unrecognized message or malformed payload.
    Protocol(ProtocolError),
    /// Caller misuse, such as parameter count missmatch.
    Programming(ProgrammingError),
    /// Server reported an error for a statement.
    Database(ErrorResponse),
    /// Notification wait expired.
    Timeout(NotifyTimeout),
    /// Cursor scroll out of bounds.
    Index(IndexError),
    /// Failed to decode a value.
    Decode(DecodeError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<io::Error>e => ErrorKind::ConnectionClosed(e));
from!(<NotOpen>e => ErrorKind::NotOpen(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<ProgrammingError>e => ErrorKind::Programming(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<NotifyTimeout>e => ErrorKind::Timeout(e));
from!(<IndexError>e => ErrorKind::Index(e));
from!(<DecodeError>e => ErrorKind::Decode(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::ConnectFailed(e) => e.fmt(f),
            Self::AuthFailed(e) => write!(f, "authentication failed: {e}"),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::ConnectionClosed(e) => write!(f, "connection to backend closed: {e}"),
            Self::CopyIo(e) => write!(f, "copy stream failed: {e}"),
            Self::NotOpen(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Programming(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Index(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// An error caused by the caller, such as parameter count missmatch.
pub struct ProgrammingError {
    reason: Cow<'static,str>,
}

impl ProgrammingError {
    /// Returns the error reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl std::error::Error for ProgrammingError { }

impl fmt::Display for ProgrammingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl fmt::Debug for ProgrammingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
