//! Cursor over the result of an executed statement.
use std::{borrow::Borrow, fmt, str::FromStr, sync::Arc};

use crate::{
    Connection, Error, Result, Row,
    common::ByteStr,
    encode::Params,
    postgres::Oid,
    query::QueryResult,
    row::Column,
};

/// Cursor over the rows of the last statement executed through it.
///
/// Rows are buffered client side, so scrolling does not involve the backend.
///
/// Results are tied to the connection state they were produced in. If the connection
/// executed anything else since, or was closed, fetching fails with
/// [`ProgrammingError`][crate::error::ProgrammingError].
///
/// # Example
///
/// ```no_run
/// # fn app(conn: &mut barepg::Connection) -> barepg::Result<()> {
/// let mut cursor = conn.cursor();
/// cursor.execute("SELECT id, name FROM users")?;
///
/// while let Some(row) = cursor.fetchone()? {
///     let (id, name) = row.decode::<(i32, String)>()?;
///     println!("{id}: {name}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct Cursor<'c> {
    conn: &'c mut Connection,
    state: State,
    /// Default size of [`Cursor::fetchmany`].
    pub arraysize: usize,
}

#[derive(Default)]
struct State {
    closed: bool,
    generation: u64,
    query: Option<String>,
    description: Option<Arc<[Column]>>,
    rows: Option<Vec<Row>>,
    position: usize,
    row_count: i64,
    last_row_id: Option<Oid>,
    messages: Vec<ByteStr>,
}

impl<'c> Cursor<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            state: State { row_count: -1, ..Default::default() },
            arraysize: 1,
        }
    }

    /// Returns the underlying connection.
    ///
    /// Executing anything through it invalidates the current rows of this cursor.
    pub fn connection(&mut self) -> &mut Connection {
        self.conn
    }

    /// Execute a query, buffering the rows of its last statement.
    pub fn execute(&mut self, sql: &str) -> Result<()> {
        self.run(sql.to_owned())
    }

    /// Execute a query with parameters substituted into placeholders.
    pub fn execute_with(&mut self, sql: &str, params: &Params) -> Result<()> {
        let sql = params.substitute(sql, self.conn.types())?;
        self.run(sql)
    }

    /// Execute a query once for each parameter set.
    ///
    /// Row count is left undetermined afterwards.
    pub fn executemany<I>(&mut self, sql: &str, params: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Borrow<Params>,
    {
        for params in params {
            self.execute_with(sql, params.borrow())?;
        }
        self.state.row_count = -1;
        Ok(())
    }

    fn run(&mut self, sql: String) -> Result<()> {
        self.check_closed()?;
        self.state = State { row_count: -1, ..Default::default() };

        let result = self.conn.execute(&sql);
        self.state.query = Some(sql);
        let result = result?;

        self.state.generation = self.conn.generation();
        self.state.row_count = result.row_count();
        self.state.last_row_id = result.last_oid();

        let QueryResult { description, rows, messages, .. } = result;
        self.state.description = description;
        self.state.rows = rows;
        self.state.messages = messages;
        Ok(())
    }

    /// Fetch the next row, [`None`] if no more rows available.
    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        let state = self.rows()?;
        let Some(row) = state.rows.as_ref().and_then(|rows| rows.get(state.position)) else {
            return Ok(None);
        };
        let row = row.clone();
        state.position += 1;
        Ok(Some(row))
    }

    /// Fetch the next `size` rows, or [`Cursor::arraysize`] rows if `None`.
    ///
    /// Returns an empty vec if no more rows available.
    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or(self.arraysize);
        let state = self.rows()?;
        let rows = state.rows.as_deref().unwrap_or_default();
        let start = state.position.min(rows.len());
        let end = start.saturating_add(size).min(rows.len());
        state.position = end;
        Ok(rows[start..end].to_vec())
    }

    /// Fetch all remaining rows.
    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        let state = self.rows()?;
        let remaining = usize::try_from(state.row_count).unwrap_or_default().saturating_sub(state.position);
        self.fetchmany(Some(remaining))
    }

    /// Move the cursor position.
    ///
    /// Returns [`IndexError`] if the target position is out of the result set, the
    /// position is left unchanged.
    pub fn scroll(&mut self, offset: i64, mode: ScrollMode) -> Result<()> {
        let state = self.rows()?;
        let target = match mode {
            ScrollMode::Relative => (state.position as i64).saturating_add(offset),
            ScrollMode::Absolute => offset,
        };
        if target < 0 || target >= state.row_count {
            return Err(IndexError { offset, mode, target, row_count: state.row_count }.into());
        }
        state.position = target as usize;
        Ok(())
    }

    /// Close the cursor, any further operation will fail.
    pub fn close(&mut self) {
        self.state = State { closed: true, row_count: -1, ..Default::default() };
    }

    /// Returns the row description of current result.
    pub fn description(&self) -> Option<&[Column]> {
        self.state.description.as_deref()
    }

    /// Returns the number of rows returned or affected by the last execution.
    ///
    /// Returns `-1` if it cannot be determined.
    pub fn row_count(&self) -> i64 {
        self.state.row_count
    }

    /// Returns the current zero based position, [`None`] if there is no result set.
    pub fn position(&self) -> Option<usize> {
        self.state.rows.as_ref().map(|_| self.state.position)
    }

    /// Returns the oid of the row inserted by the last execution.
    pub fn last_row_id(&self) -> Option<Oid> {
        self.state.last_row_id
    }

    /// Returns the last executed query text, after parameter substitution.
    pub fn query(&self) -> Option<&str> {
        self.state.query.as_deref()
    }

    /// Returns notices received by the last execution.
    pub fn messages(&self) -> &[ByteStr] {
        &self.state.messages
    }

    fn check_closed(&self) -> Result<()> {
        match self.state.closed {
            true => Err(Error::programming("cursor is closed")),
            false => Ok(()),
        }
    }

    /// Returns state with a result set that is still current.
    fn rows(&mut self) -> Result<&mut State> {
        self.check_closed()?;
        if self.state.rows.is_none() {
            return Err(Error::programming("no result set available"));
        }
        if self.conn.is_closed() || self.conn.generation() != self.state.generation {
            return Err(Error::programming("cursor result is stale, connection executed another query"));
        }
        Ok(&mut self.state)
    }
}

/// Fetch rows until exhausted, the iterator ends where [`Cursor::fetchone`] returns [`None`].
impl Iterator for Cursor<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetchone().transpose()
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.state.query)
            .field("row_count", &self.state.row_count)
            .field("position", &self.position())
            .field("closed", &self.state.closed)
            .finish()
    }
}

/// [`Cursor::scroll`] mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrollMode {
    /// Offset from current position.
    #[default]
    Relative,
    /// Target position.
    Absolute,
}

impl ScrollMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relative => "relative",
            Self::Absolute => "absolute",
        }
    }
}

impl FromStr for ScrollMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "relative" => Ok(Self::Relative),
            "absolute" => Ok(Self::Absolute),
            _ => Err(Error::programming(format!("unknown scroll mode [{s}]"))),
        }
    }
}

impl fmt::Display for ScrollMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error when scrolling out of the result set.
pub struct IndexError {
    offset: i64,
    mode: ScrollMode,
    target: i64,
    row_count: i64,
}

impl IndexError {
    /// Returns the rejected target position.
    pub fn target(&self) -> i64 {
        self.target
    }
}

impl std::error::Error for IndexError { }

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scroll({}, \"{}\") target position: {} outside of range: 0..{}",
            self.offset, self.mode, self.target, self.row_count - 1,
        )
    }
}

impl fmt::Debug for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ErrorKind, Value, connection::mock::{Script, connect}};

    fn five_rows(script: Script) -> Script {
        let rows: &[&[Option<&str>]] = &[&[Some("1")], &[Some("2")], &[Some("3")], &[Some("4")], &[Some("5")]];
        script.select(&[("n", 23)], rows).ready()
    }

    fn n(row: Row) -> Value {
        row.into_values().remove(0)
    }

    #[test]
    fn fetch() {
        let (mut conn, _) = connect(five_rows(Script::new().startup())).unwrap();
        let mut cursor = conn.cursor();
        cursor.execute("SELECT n FROM generate_series(1,5) n").unwrap();

        assert_eq!(cursor.row_count(), 5);
        assert_eq!(cursor.description().unwrap()[0].name(), "n");
        assert_eq!(n(cursor.fetchone().unwrap().unwrap()), Value::Int(1));

        cursor.arraysize = 2;
        let rows = cursor.fetchmany(None).unwrap();
        assert_eq!(rows.into_iter().map(n).collect::<Vec<_>>(), [Value::Int(2), Value::Int(3)]);

        let rows = cursor.fetchall().unwrap();
        assert_eq!(rows.into_iter().map(n).collect::<Vec<_>>(), [Value::Int(4), Value::Int(5)]);

        assert!(cursor.fetchone().unwrap().is_none());
        assert!(cursor.fetchmany(Some(10)).unwrap().is_empty());
        assert!(cursor.fetchall().unwrap().is_empty());
    }

    #[test]
    fn iterate() {
        let (mut conn, _) = connect(five_rows(Script::new().startup())).unwrap();
        let mut cursor = conn.cursor();
        cursor.execute("SELECT n FROM generate_series(1,5) n").unwrap();
        cursor.scroll(2, ScrollMode::Absolute).unwrap();

        let rest = cursor.by_ref().map(|row| n(row.unwrap())).collect::<Vec<_>>();
        assert_eq!(rest, [Value::Int(3), Value::Int(4), Value::Int(5)]);
        assert!(cursor.next().is_none());
        assert!(cursor.fetchone().unwrap().is_none());
    }

    #[test]
    fn scroll_bounds() {
        let (mut conn, _) = connect(five_rows(Script::new().startup())).unwrap();
        let mut cursor = conn.cursor();
        cursor.execute("SELECT n FROM generate_series(1,5) n").unwrap();
        cursor.fetchone().unwrap();

        let err = cursor.scroll(5, ScrollMode::Absolute).unwrap_err();
        let ErrorKind::Index(index) = err.kind() else {
            panic!("expected index error, found {err}");
        };
        assert_eq!(index.target(), 5);
        assert_eq!(cursor.position(), Some(1));

        assert!(cursor.scroll(-2, ScrollMode::Relative).is_err());
        assert_eq!(cursor.position(), Some(1));

        cursor.scroll(4, ScrollMode::Absolute).unwrap();
        assert_eq!(n(cursor.fetchone().unwrap().unwrap()), Value::Int(5));
        assert!(cursor.fetchone().unwrap().is_none());

        cursor.scroll(-4, ScrollMode::Relative).unwrap();
        assert_eq!(cursor.position(), Some(1));
    }

    #[test]
    fn scroll_mode_parse() {
        assert_eq!("relative".parse::<ScrollMode>().unwrap(), ScrollMode::Relative);
        assert_eq!("absolute".parse::<ScrollMode>().unwrap(), ScrollMode::Absolute);
        let err = "sideways".parse::<ScrollMode>().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Programming(_)));
    }

    #[test]
    fn command_row_count() {
        let script = Script::new()
            .startup()
            .complete("INSERT 17043 1")
            .ready()
            .complete("UPDATE 3")
            .ready()
            .complete("CREATE TABLE")
            .ready();
        let (mut conn, _) = connect(script).unwrap();
        let mut cursor = conn.cursor();

        cursor.execute("INSERT INTO t VALUES (1)").unwrap();
        assert_eq!(cursor.row_count(), 1);
        assert_eq!(cursor.last_row_id(), Some(17043));
        assert_eq!(cursor.position(), None);
        assert!(matches!(cursor.fetchone().unwrap_err().kind(), ErrorKind::Programming(_)));

        cursor.execute("UPDATE t SET a = 1").unwrap();
        assert_eq!(cursor.row_count(), 3);
        assert_eq!(cursor.last_row_id(), None);

        cursor.execute("CREATE TABLE t2 ()").unwrap();
        assert_eq!(cursor.row_count(), -1);
    }

    #[test]
    fn executemany_resets_row_count() {
        let script = Script::new()
            .startup()
            .complete("INSERT 0 1")
            .ready()
            .complete("INSERT 0 1")
            .ready();
        let (mut conn, _) = connect(script).unwrap();
        let mut cursor = conn.cursor();

        let params = [Params::positional().bind(1), Params::positional().bind(2)];
        cursor.executemany("INSERT INTO t VALUES (%s)", &params).unwrap();
        assert_eq!(cursor.row_count(), -1);
        assert_eq!(cursor.query(), Some("INSERT INTO t VALUES (2)"));
    }

    #[test]
    fn statement_error() {
        let script = Script::new()
            .startup()
            .notice("WARNING:  something\n")
            .error("ERROR:  syntax error at or near \"SELEC\"\n")
            .ready();
        let (mut conn, _) = connect(script).unwrap();
        let mut cursor = conn.cursor();

        let err = cursor.execute("SELEC 1").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert_eq!(cursor.query(), Some("SELEC 1"));
        assert_eq!(cursor.row_count(), -1);
    }

    #[test]
    fn stale_after_connection_query() {
        let script = five_rows(Script::new().startup())
            .complete("SELECT")
            .ready();
        let (mut conn, _) = connect(script).unwrap();
        let mut cursor = conn.cursor();
        cursor.execute("SELECT n FROM generate_series(1,5) n").unwrap();
        cursor.connection().execute("SELECT").unwrap();

        let err = cursor.fetchone().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Programming(_)), "{err}");
    }

    #[test]
    fn stale_after_close() {
        let (mut conn, _) = connect(five_rows(Script::new().startup())).unwrap();
        let mut cursor = conn.cursor();
        cursor.execute("SELECT n FROM generate_series(1,5) n").unwrap();
        cursor.connection().close().unwrap();

        assert!(cursor.fetchone().is_err());
        assert!(matches!(cursor.execute("SELECT 1").unwrap_err().kind(), ErrorKind::NotOpen(_)));
    }

    #[test]
    fn closed_cursor() {
        let (mut conn, _) = connect(five_rows(Script::new().startup())).unwrap();
        let mut cursor = conn.cursor();
        cursor.execute("SELECT n FROM generate_series(1,5) n").unwrap();
        cursor.close();

        assert!(matches!(cursor.fetchone().unwrap_err().kind(), ErrorKind::Programming(_)));
        assert!(matches!(cursor.execute("SELECT 1").unwrap_err().kind(), ErrorKind::Programming(_)));
    }
}
