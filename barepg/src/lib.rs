//! Blocking Postgres Driver, speaking the frontend/backend protocol version 2.0
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use barepg::Connection;
//!
//! # fn app() -> barepg::Result<()> {
//! let mut conn = Connection::connect_env()?;
//!
//! let params = barepg::Params::positional().bind("Foo");
//! let row = conn.execute_with("SELECT 420, %s", &params)?.into_rows().remove(0);
//! let res = row.decode::<(i32,String)>()?;
//!
//! assert_eq!(res.0,420);
//! assert_eq!(res.1.as_str(),"Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Cursor:
//!
//! ```no_run
//! use barepg::{Connection, ScrollMode};
//!
//! # fn app() -> barepg::Result<()> {
//! let mut conn = Connection::connect("host=127.0.0.1 dbname='my db' user=alice")?;
//! let mut cursor = conn.cursor();
//!
//! cursor.execute("SELECT * FROM generate_series(1,10)")?;
//! cursor.scroll(5, ScrollMode::Absolute)?;
//!
//! for row in cursor.by_ref() {
//!     println!("{:?}", row?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Notification:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! # fn app(conn: &mut barepg::Connection) -> barepg::Result<()> {
//! conn.execute("LISTEN jobs")?;
//!
//! let notify = conn.wait_for_notify(Some(Duration::from_secs(10)))?;
//! println!("{} from {}", notify.channel(), notify.process_id());
//! # Ok(())
//! # }
//! ```

pub mod common;
mod net;
mod ext;
mod stream;

// Protocol
pub mod postgres;
mod protocol;

// Encoding
mod value;
pub mod encode;
pub mod types;

// Component
pub mod row;
pub mod query;

// Operation
pub mod cursor;
pub mod large_object;
pub mod transaction;

// Connection
pub mod connection;

pub mod error;


pub use value::Value;
pub use encode::Params;
pub use row::{Row, FromRow, Decode, DecodeError};
pub use query::QueryResult;

pub use connection::{Connection, Config};
pub use protocol::{Notification, Phase};
pub use cursor::{Cursor, ScrollMode};
pub use large_object::LargeObject;
pub use transaction::Transaction;
pub use error::{Error, ErrorKind, Result};

#[cfg(feature = "macros")]
pub use barepg_macros::FromRow;
