//! The [`Transaction`] type.
use std::ops::{Deref, DerefMut};

use crate::{Connection, Result, common::warn};

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`Connection::begin`].
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, transaction will be rolled back.
///
/// # Example
///
/// ```no_run
/// # fn test(conn: &mut barepg::Connection) -> barepg::Result<()> {
/// let mut tx = conn.begin()?;
///
/// tx.execute("insert into post(name) values('foo')")?;
///
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn begin(conn: &'c mut Connection) -> Result<Self> {
        conn.execute("BEGIN")?;
        Ok(Self { conn, finished: false })
    }

    /// Commit transaction.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn.commit()
    }

    /// Rollback transaction.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback()
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_closed() {
            return;
        }
        if let Err(_err) = self.conn.rollback() {
            warn!("failed to rollback transaction: {_err}");
        }
    }
}

#[cfg(test)]
mod test {
    use crate::connection::mock::{Script, connect, queries};

    fn script() -> Script {
        Script::new()
            .startup()
            .complete("BEGIN")
            .ready()
            .complete("INSERT 0 1")
            .ready()
            .complete("COMMIT")
            .ready()
    }

    #[test]
    fn commit() {
        let (mut conn, output) = connect(script()).unwrap();
        let mut tx = conn.begin().unwrap();
        tx.execute("INSERT INTO t VALUES (1)").unwrap();
        tx.commit().unwrap();

        let queries = queries(&output);
        assert_eq!(queries[3..], ["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]);
    }

    #[test]
    fn rollback_on_drop() {
        let script = Script::new()
            .startup()
            .complete("BEGIN")
            .ready()
            .complete("ROLLBACK")
            .ready();
        let (mut conn, output) = connect(script).unwrap();
        drop(conn.begin().unwrap());

        let queries = queries(&output);
        assert_eq!(queries[3..], ["BEGIN", "ROLLBACK"]);
    }
}
