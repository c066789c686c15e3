//! Postgres Frontend and Backend Protocol, version 2.0
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies
//! the message type. Unlike protocol 3.0, there is **no** length prefix after the message type,
//! each message knows how much to read from its own fields.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃ Ty ┃             Body             ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┫
//! ┃ u8 ┃ fields defined by the type   ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┫
//! ┃ 43 ┃ 'S' 'E' 'L' 'E' 'C' 'T' '\0' ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```
//!
//! The very first message sent by the client (the startup packet) and the password packet
//! have no message-type byte, but are prefixed by their length instead.
//!
//! Strings are nul terminated. Integers are in network byte order.
//!
//! ## [`Format`][PgFormat]
//!
//! Rows are either sent as `AsciiRow` or `BinaryRow`, see [`PgFormat`].
//!
//! <https://www.postgresql.org/docs/7.3/protocol.html>

mod pg_type;
mod pg_format;

pub mod frontend;
pub mod backend;

mod error;

pub use pg_type::{Oid, TypeCategory};
pub use pg_format::PgFormat;

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol, ErrorResponse, NoticeResponse};
pub use error::ProtocolError;
