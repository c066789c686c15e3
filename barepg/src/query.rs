//! Statement results.
use std::{fmt, sync::Arc};

use crate::{
    Error, Result, Row,
    common::ByteStr,
    postgres::Oid,
    row::Column,
};

/// Result of one statement in a query batch.
///
/// Statements of a multi-statement query are split by their command tag, see
/// [`Connection::execute_batch`][crate::Connection::execute_batch].
#[derive(Default)]
pub struct QueryResult {
    pub(crate) description: Option<Arc<[Column]>>,
    pub(crate) rows: Option<Vec<Row>>,
    pub(crate) completed: Option<ByteStr>,
    pub(crate) error: Option<Error>,
    pub(crate) messages: Vec<ByteStr>,
}

impl QueryResult {
    /// Returns the row description, [`None`] if statement returns no rows.
    pub fn description(&self) -> Option<&[Column]> {
        self.description.as_deref()
    }

    /// Returns the decoded rows, [`None`] if statement returns no rows.
    pub fn rows(&self) -> Option<&[Row]> {
        self.rows.as_deref()
    }

    /// Consume self into decoded rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows.unwrap_or_default()
    }

    /// Returns the command tag, such as `INSERT 0 1`.
    pub fn command_tag(&self) -> Option<&str> {
        self.completed.as_deref()
    }

    /// Returns the statement error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns notices received while executing this statement.
    pub fn messages(&self) -> &[ByteStr] {
        &self.messages
    }

    /// Raise the attached error, if any.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Returns the number of rows returned or affected.
    ///
    /// Returns `-1` if it cannot be determined.
    pub fn row_count(&self) -> i64 {
        if let Some(rows) = &self.rows {
            return rows.len() as i64;
        }
        self.completed
            .as_deref()
            .and_then(|tag| tag.rsplit(' ').next())
            .and_then(|rows| rows.parse().ok())
            .unwrap_or(-1)
    }

    /// Returns the number of rows affected from command tag.
    pub fn rows_affected(&self) -> u64 {
        let Some(tag) = self.completed.as_deref() else {
            return 0;
        };
        let mut whs = tag.split_whitespace();
        let Some(tag) = whs.next() else {
            return 0;
        };
        let Some(rows) = whs.next() else {
            return 0;
        };
        match tag {
            "INSERT" => whs.next().unwrap_or_default(),
            "SELECT" => rows,
            "UPDATE" => rows,
            "DELETE" => rows,
            "FETCH" => rows,
            "MOVE" => rows,
            "COPY" => rows,
            _ => return 0,
        }
        .parse()
        .unwrap_or_default()
    }

    /// Returns the oid of the inserted row, from `INSERT <oid> 1` command tag.
    pub fn last_oid(&self) -> Option<Oid> {
        let mut words = self.completed.as_deref()?.split(' ').rev();
        let _rows = words.next()?;
        let oid = words.next()?;
        match words.next()? {
            "INSERT" => oid.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("completed", &self.completed)
            .field("rows", &self.rows)
            .field("error", &self.error)
            .field("messages", &self.messages)
            .finish()
    }
}
