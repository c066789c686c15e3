//! Postgres connection.
use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt,
    io::{self, BufRead, Write},
    time::Duration,
};

use crate::{
    Error, Result, Value,
    common::{ByteStr, span, unit_error, verbose, warn},
    cursor::Cursor,
    encode::Params,
    large_object::LargeObject,
    net::Socket,
    postgres::{Oid, ProtocolError, frontend::{FnArg, Startup}},
    protocol::{Notification, Phase, Protocol},
    query::QueryResult,
    stream::PgStream,
    transaction::Transaction,
    types::TypeRegistry,
};

mod config;

pub use config::{Config, ParseError, Target};

/// A single postgres connection.
///
/// Every operation blocks until the backend is ready for the next query.
///
/// # Example
///
/// ```no_run
/// use barepg::Connection;
///
/// # fn app() -> barepg::Result<()> {
/// let mut conn = Connection::connect("host=127.0.0.1 dbname=app user=alice")?;
///
/// let result = conn.execute("SELECT 420, 'Foo'")?;
/// let (id, name) = result.into_rows().remove(0).decode::<(i32, String)>()?;
///
/// assert_eq!(id, 420);
/// assert_eq!(name, "Foo");
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    protocol: Protocol,
    types: TypeRegistry,
    lo_funcs: Option<HashMap<String, Oid>>,
    generation: u64,
}

impl Connection {
    /// Connect using libpq keyword string or url, see [`Config::parse`].
    pub fn connect(dsn: &str) -> Result<Self> {
        Self::connect_with(Config::parse(dsn)?)
    }

    /// Connect using configuration from environment variable, see [`Config::from_env`].
    pub fn connect_env() -> Result<Self> {
        Self::connect_with(Config::from_env())
    }

    /// Connect using given config.
    pub fn connect_with(config: Config) -> Result<Self> {
        let user = config.user_name();
        config.validate(&user)?;

        let target = config.target();
        verbose!(%target, "connecting");

        let socket = match &target {
            Target::Tcp { host, port } => Socket::connect_tcp(host, *port),
            Target::Unix(path) => Socket::connect_socket(path),
        };
        let socket = match socket {
            Ok(ok) => ok,
            Err(source) => return Err(Error::connect_failed(ConnectError { target, source })),
        };

        Self::startup(PgStream::new(socket), &config, user)
    }

    fn startup(io: PgStream, config: &Config, user: ByteStr) -> Result<Self> {
        span!("connect", user = %user);
        let mut me = Self {
            protocol: Protocol::new(io, user.clone(), config.password.clone()),
            types: TypeRegistry::new(),
            lo_funcs: None,
            generation: 0,
        };

        me.protocol.startup(Startup {
            database: &config.dbname,
            user: &user,
            options: &config.options,
        }, &me.types)?;

        me.bootstrap()?;
        Ok(me)
    }

    /// Set session encoding, and bind server type oids to registered decoders.
    fn bootstrap(&mut self) -> Result<()> {
        self.execute("SET CLIENT_ENCODING to 'UNICODE'")?;
        self.execute("SET STANDARD_CONFORMING_STRINGS to 'ON'")?;

        let types = self.execute("SELECT oid, typname FROM pg_type")?;
        for row in types.into_rows() {
            let (Some(oid), Some(Value::Text(name))) = (row.get(0).and_then(value_oid), row.get(1)) else {
                return Err(ProtocolError::malformed("unexpected pg_type catalog row").into());
            };
            self.types.bind_oid(oid, name);
        }
        Ok(())
    }

    /// Execute a query, returns the result of the last statement.
    ///
    /// If the statement failed, its error is returned.
    ///
    /// Placeholders are not substituted, a `%` is sent as is.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let mut batch = self.execute_batch(sql)?;
        match batch.pop() {
            Some(last) => last.into_result(),
            None => Ok(QueryResult::default()),
        }
    }

    /// Execute a query with parameters substituted into placeholders, see [`Params`].
    pub fn execute_with(&mut self, sql: &str, params: &Params) -> Result<QueryResult> {
        let sql = params.substitute(sql, &self.types)?;
        self.execute(&sql)
    }

    /// Execute a possibly multi-statement query, returns a result per statement.
    ///
    /// Statement errors are attached to their result instead of returned.
    pub fn execute_batch(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        self.generation += 1;
        self.protocol.query(sql, &self.types)
    }

    /// Commit current transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").map(drop)
    }

    /// Rollback current transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").map(drop)
    }

    /// Begin a transaction, rolled back when dropped unless commited.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        Transaction::begin(self)
    }

    /// Create a cursor over results of this connection.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Call a server function by oid, returns the opaque result.
    pub fn funcall(&mut self, oid: Oid, args: &[FnArg]) -> Result<Option<Bytes>> {
        self.generation += 1;
        self.protocol.function_call(oid, args, &self.types)
    }

    /// Call a function returning a 4 bytes integer.
    pub(crate) fn funcall_int(&mut self, oid: Oid, args: &[FnArg]) -> Result<i32> {
        match self.funcall(oid, args)? {
            Some(value) => match <[u8;4]>::try_from(&value[..]) {
                Ok(be) => Ok(i32::from_be_bytes(be)),
                Err(_) => Err(ProtocolError::malformed("expected 4 bytes function result").into()),
            },
            None => Err(ProtocolError::malformed("function returns no result").into()),
        }
    }

    /// Returns the oid of large object function.
    ///
    /// Function oids are looked up once on first use.
    pub(crate) fn lo_function(&mut self, name: &str) -> Result<Oid> {
        if self.lo_funcs.is_none() {
            let result = self.execute("SELECT proname, oid FROM pg_proc WHERE proname like 'lo%'")?;
            let mut funcs = HashMap::new();
            for row in result.into_rows() {
                if let (Some(Value::Text(name)), Some(oid)) = (row.get(0), row.get(1).and_then(value_oid)) {
                    funcs.insert(name.clone(), oid);
                }
            }
            self.lo_funcs = Some(funcs);
        }

        match self.lo_funcs.as_ref().and_then(|funcs| funcs.get(name)) {
            Some(oid) => Ok(*oid),
            None => Err(Error::programming(format!("server has no large object function `{name}`"))),
        }
    }

    /// Create a new large object, returns its oid.
    ///
    /// `mode` is a combination of [`INV_READ`][crate::large_object::INV_READ] and
    /// [`INV_WRITE`][crate::large_object::INV_WRITE].
    pub fn lo_create(&mut self, mode: i32) -> Result<Oid> {
        let oid = self.lo_function("lo_creat")?;
        let lobj = self.funcall_int(oid, &[FnArg::Int(mode)])?;
        Ok(lobj as Oid)
    }

    /// Open a large object, positioned at offset 0.
    pub fn lo_open(&mut self, lobj: Oid, mode: i32) -> Result<LargeObject<'_>> {
        let oid = self.lo_function("lo_open")?;
        let fd = self.funcall_int(oid, &[FnArg::Oid(lobj), FnArg::Int(mode)])?;
        let mut handle = LargeObject::new(self, fd);
        handle.seek(0, crate::large_object::SEEK_SET)?;
        Ok(handle)
    }

    /// Delete a large object.
    pub fn lo_unlink(&mut self, lobj: Oid) -> Result<()> {
        let oid = self.lo_function("lo_unlink")?;
        self.funcall(oid, &[FnArg::Oid(lobj)])?;
        Ok(())
    }

    /// Wait for an asynchronous notification.
    ///
    /// Queued notifications are returned first, in arrival order. Otherwise wait for the
    /// backend up to `timeout`, [`None`] blocks indefinitely and zero duration polls once.
    ///
    /// Returns [`NotifyTimeout`] error if timeout expired.
    pub fn wait_for_notify(&mut self, timeout: Option<Duration>) -> Result<Notification> {
        self.protocol.wait_for_notify(timeout, &self.types)
    }

    /// Send termination message and close the socket.
    ///
    /// Any subsequent operation fails with [`NotOpen`].
    pub fn close(&mut self) -> Result<()> {
        self.generation += 1;
        self.protocol.terminate()
    }

    /// Returns the connection phase.
    pub fn phase(&self) -> Phase {
        self.protocol.phase()
    }

    /// Returns `true` if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.protocol.phase() == Phase::Closed
    }

    /// Returns the backend process id, for cancellation.
    pub fn backend_pid(&self) -> Option<i32> {
        self.protocol.backend_key().map(|key| key.process_id)
    }

    /// Returns the backend secret key, for cancellation.
    pub fn secret_key(&self) -> Option<i32> {
        self.protocol.backend_key().map(|key| key.secret_key)
    }

    /// Returns the type registry.
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Returns mutable type registry, to register custom decoders and encoders.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// Set the source of `COPY ... FROM STDIN`, defaults to process stdin.
    pub fn set_copy_input<R: BufRead + Send + 'static>(&mut self, source: R) {
        self.protocol.set_copy_in(Some(Box::new(source)));
    }

    /// Set the sink of `COPY ... TO STDOUT`, defaults to process stdout.
    pub fn set_copy_output<W: Write + Send + 'static>(&mut self, sink: W) {
        self.protocol.set_copy_out(Some(Box::new(sink)));
    }

    /// Reset copy source and sink to process stdin and stdout.
    pub fn reset_copy_streams(&mut self) {
        self.protocol.set_copy_in(None);
        self.protocol.set_copy_out(None);
    }

    /// Counter incremented by every operation that replaces the last results.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

/// Oid column is text until `oid` type itself is bound.
fn value_oid(value: &Value) -> Option<Oid> {
    match value {
        Value::Text(text) => text.parse().ok(),
        value => value.as_i64().and_then(|oid| Oid::try_from(oid).ok()),
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(_err) = self.protocol.terminate() {
            warn!("failed to terminate connection: {_err}");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("phase", &self.protocol.phase())
            .field("backend_pid", &self.backend_pid())
            .finish_non_exhaustive()
    }
}

unit_error! {
    /// An error when operating on closed connection or large object.
    pub struct NotOpen("connection not open");
}

unit_error! {
    /// An error when waiting for notification timed out.
    pub struct NotifyTimeout("timed out waiting for notification");
}

/// An error when socket could not be opened.
pub struct ConnectError {
    target: Target,
    source: io::Error,
}

impl ConnectError {
    /// Returns the address connected to.
    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to {}: {}", self.target, self.source)
    }
}

impl fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}


#[cfg(test)]
mod test {
    use super::mock::{Script, connect, queries};
    use super::*;
    use crate::ErrorKind;
    use md5::{Digest, Md5};
    use std::{
        io::Read,
        net::TcpListener,
        thread,
    };

    #[test]
    fn startup_binds_types() {
        let (conn, output) = connect(Script::new().startup()).unwrap();
        assert_eq!(conn.backend_pid(), Some(4242));
        assert_eq!(conn.secret_key(), Some(99));
        assert_eq!(conn.types().resolve(23).name(), "int4");
        assert_eq!(conn.types().resolve(1700).oid(), Some(1700));
        assert_eq!(queries(&output), [
            "SET CLIENT_ENCODING to 'UNICODE'",
            "SET STANDARD_CONFORMING_STRINGS to 'ON'",
            "SELECT oid, typname FROM pg_type",
        ]);
    }

    #[test]
    fn startup_packet_layout() {
        let (_conn, output) = connect(Script::new().startup()).unwrap();
        let output = output.lock().unwrap();
        assert_eq!(output[..4], 296u32.to_be_bytes());
        assert_eq!(output[4..8], [0, 2, 0, 0]);
        assert_eq!(&output[8..11], b"app");
        assert_eq!(&output[72..77], b"alice");
        assert!(output[77..296].iter().all(|&b| b == 0));
    }

    #[test]
    fn multi_statement_batch() {
        let script = Script::new()
            .startup()
            .select(&[("?column?", 23)], &[&[Some("1")]])
            .select(&[("?column?", 23)], &[&[Some("2")]])
            .ready();
        let (mut conn, _) = connect(script).unwrap();

        let batch = conn.execute_batch("SELECT 1; SELECT 2;").unwrap();
        assert_eq!(batch.len(), 2);
        for (result, expected) in batch.iter().zip([1, 2]) {
            assert_eq!(result.command_tag(), Some("SELECT"));
            let rows = result.rows().unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].values(), [Value::Int(expected)]);
        }
    }

    #[test]
    fn mid_batch_error_isolation() {
        let script = Script::new()
            .startup()
            .select(&[("a", 23)], &[&[Some("1")]])
            .error("ERROR:  division by zero\n")
            .select(&[("c", 25)], &[&[Some("three")]])
            .ready();
        let (mut conn, _) = connect(script).unwrap();

        let batch = conn.execute_batch("SELECT 1; SELECT 1/0; SELECT 'three'").unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].rows().unwrap()[0].values(), [Value::Int(1)]);
        assert!(batch[0].error().is_none());
        assert!(matches!(batch[1].error().map(Error::kind), Some(ErrorKind::Database(_))));
        assert_eq!(batch[2].rows().unwrap()[0].values(), [Value::Text("three".into())]);
    }

    #[test]
    fn execute_raises_statement_error() {
        let script = Script::new()
            .startup()
            .error("ERROR:  relation \"nope\" does not exist\n")
            .ready()
            .complete("SELECT")
            .ready();
        let (mut conn, _) = connect(script).unwrap();

        let err = conn.execute("SELECT * FROM nope").unwrap_err();
        let ErrorKind::Database(err) = err.kind() else {
            panic!("expected database error, found {err}");
        };
        assert_eq!(err.message(), "relation \"nope\" does not exist");

        // connection still usable
        assert_eq!(conn.execute("SELECT").unwrap().command_tag(), Some("SELECT"));
    }

    #[test]
    fn notices_and_empty_query() {
        let script = Script::new()
            .startup()
            .cursor()
            .notice("NOTICE:  table does not exist, skipping\n")
            .complete("DROP TABLE")
            .ready()
            .empty_query()
            .ready();
        let (mut conn, _) = connect(script).unwrap();

        let result = conn.execute("DROP TABLE IF EXISTS foo").unwrap();
        assert_eq!(result.command_tag(), Some("DROP TABLE"));
        assert_eq!(result.messages().len(), 1);

        let result = conn.execute("").unwrap();
        assert_eq!(result.command_tag(), Some(""));
    }

    #[test]
    fn undecodable_row_attaches_error() {
        let script = Script::new()
            .startup()
            .select(&[("b", 16)], &[&[Some("t")], &[Some("maybe")], &[Some("f")]])
            .ready();
        let (mut conn, _) = connect(script).unwrap();

        let mut batch = conn.execute_batch("SELECT b FROM t").unwrap();
        let result = batch.remove(0);
        assert!(matches!(result.error().map(Error::kind), Some(ErrorKind::Decode(_))));
        assert_eq!(result.rows().unwrap().len(), 2);
    }

    #[test]
    fn parameters_are_quoted() {
        let script = Script::new()
            .startup()
            .complete("INSERT 0 1")
            .ready();
        let (mut conn, output) = connect(script).unwrap();

        let params = Params::positional().bind("O'Brien").bind(None::<i32>);
        conn.execute_with("INSERT INTO t VALUES (%s, %s)", &params).unwrap();
        assert_eq!(
            queries(&output).last().unwrap(),
            r"INSERT INTO t VALUES (E'O\x27Brien', NULL)",
        );
    }

    #[test]
    fn notification_fifo() {
        let script = Script::new()
            .startup()
            .notify(1, "A")
            .complete("SELECT")
            .notify(2, "B")
            .ready()
            .notify(3, "C");
        let (mut conn, _) = connect(script).unwrap();

        conn.execute("SELECT").unwrap();
        let a = conn.wait_for_notify(Some(Duration::ZERO)).unwrap();
        assert_eq!((a.channel(), a.process_id()), ("A", 1));
        let b = conn.wait_for_notify(Some(Duration::ZERO)).unwrap();
        assert_eq!((b.channel(), b.process_id()), ("B", 2));
        let c = conn.wait_for_notify(None).unwrap();
        assert_eq!((c.channel(), c.process_id()), ("C", 3));

        let err = conn.wait_for_notify(Some(Duration::from_millis(5))).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));
    }

    #[test]
    fn cleartext_password() {
        let script = Script::new().auth(3, &[]).startup();
        let (_conn, output) = connect(script).unwrap();
        let output = output.lock().unwrap();
        let mut expected = 11u32.to_be_bytes().to_vec();
        expected.extend(b"secret\0");
        assert_eq!(output[296..307], expected);
    }

    #[test]
    fn md5_challenge() {
        let script = Script::new().auth(5, b"\x01\x02\x03\x04").startup();
        let (_conn, output) = connect(script).unwrap();
        let output = output.lock().unwrap();
        let password = b"md598a0412b9c31436fc53776e863350083\0";
        assert_eq!(output[296..300], (password.len() as u32 + 4).to_be_bytes());
        assert_eq!(output[300..300 + password.len()], password[..]);
    }

    #[test]
    fn md5_composition() {
        use crate::protocol::md5_password;
        assert_eq!(
            md5_password("postgres", "s3cr3t 'pässwörd' with spaces & symbols!", *b"\xff\x00\x80\x7f"),
            "md5c18fcd1261293910c11e9f6a6bb27b68",
        );
        assert_eq!(md5_password("bob", "", *b"salt"), "md568859cebdfe80fd2e4e54068324eedec");
    }

    #[test]
    fn unsupported_auth() {
        for (code, salt) in [(1, &b""[..]), (2, &b""[..]), (4, &b"ab"[..])] {
            let err = connect(Script::new().auth(code, salt)).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::UnsupportedAuth(_)), "{err}");
        }
        let err = connect(Script::new().auth(7, &[])).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)), "{err}");
    }

    #[test]
    fn auth_failed() {
        let script = Script::new()
            .auth(3, &[])
            .error("FATAL:  password authentication failed for user \"alice\"\n");
        let err = connect(script).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AuthFailed(_)), "{err}");
    }

    #[test]
    fn unknown_message_type() {
        let err = connect(Script::new().raw(b"?")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)), "{err}");
    }

    #[test]
    fn peer_closed_mid_query() {
        let script = Script::new().startup().describe(&[("a", 23)]);
        let (mut conn, _) = connect(script).unwrap();
        let err = conn.execute("SELECT 1").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConnectionClosed(_)), "{err}");
        assert!(conn.is_closed());
    }

    #[test]
    fn close_then_not_open() {
        let (mut conn, output) = connect(Script::new().startup()).unwrap();
        conn.close().unwrap();
        assert_eq!(output.lock().unwrap().last(), Some(&b'X'));
        assert!(conn.is_closed());
        assert!(matches!(conn.close().unwrap_err().kind(), ErrorKind::NotOpen(_)));
        assert!(matches!(conn.execute("SELECT 1").unwrap_err().kind(), ErrorKind::NotOpen(_)));
        assert!(matches!(conn.funcall(1, &[]).unwrap_err().kind(), ErrorKind::NotOpen(_)));
    }

    #[test]
    fn function_call() {
        let script = Script::new()
            .startup()
            .function_result(Some(b"\0\0\0\x07"))
            .ready()
            .function_result(None)
            .ready()
            .error("ERROR:  function 1 does not exist\n")
            .ready();
        let (mut conn, output) = connect(script).unwrap();

        assert_eq!(conn.funcall_int(1, &[FnArg::Int(1)]).unwrap(), 7);
        assert_eq!(conn.funcall(2, &[FnArg::Oid(u32::MAX)]).unwrap(), None);
        let err = conn.funcall(3, &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)), "{err}");

        let output = output.lock().unwrap();
        let mut expected = b"F\0".to_vec();
        expected.extend(2u32.to_be_bytes());
        expected.extend(1i32.to_be_bytes());
        expected.extend(4i32.to_be_bytes());
        expected.extend(u32::MAX.to_be_bytes());
        assert!(output.windows(expected.len()).any(|w| w == expected));
    }

    #[test]
    fn copy_in_and_out() {
        let script = Script::new()
            .startup()
            .raw(b"G")
            .complete("COPY 2")
            .ready()
            .raw(b"H1\tone\n2\ttwo\n\\.\n")
            .complete("COPY 2")
            .ready();
        let (mut conn, output) = connect(script).unwrap();

        conn.set_copy_input(&b"1\tone\n2\ttwo"[..]);
        conn.execute("COPY t FROM STDIN").unwrap();
        assert!(output.lock().unwrap().ends_with(b"STDIN\01\tone\n2\ttwo\n\\.\n"));

        let sink = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        conn.set_copy_output(SharedSink(sink.clone()));
        conn.execute("COPY t TO STDOUT").unwrap();
        assert_eq!(&sink.lock().unwrap()[..], b"1\tone\n2\ttwo\n");
    }

    #[test]
    fn copy_in_stops_at_end_marker() {
        let script = Script::new()
            .startup()
            .raw(b"G")
            .complete("COPY 1")
            .ready();
        let (mut conn, output) = connect(script).unwrap();

        conn.set_copy_input(&b"a\n\\.\nignored\n"[..]);
        conn.execute("COPY t FROM STDIN").unwrap();
        assert!(output.lock().unwrap().ends_with(b"\0a\n\\.\n"));
    }

    #[test]
    fn copy_in_end_marker_without_newline() {
        let script = Script::new()
            .startup()
            .raw(b"G")
            .complete("COPY 1")
            .ready();
        let (mut conn, output) = connect(script).unwrap();

        conn.set_copy_input(&b"a\n\\."[..]);
        conn.execute("COPY t FROM STDIN").unwrap();
        let output = output.lock().unwrap();
        assert!(output.ends_with(b"\0a\n\\.\n"));
        assert_eq!(output.windows(2).filter(|w| *w == b"\\.").count(), 1);
    }

    struct FailingSource;

    impl io::Read for FailingSource {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("source failed"))
        }
    }

    impl BufRead for FailingSource {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            Err(io::Error::other("source failed"))
        }

        fn consume(&mut self, _: usize) {}
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("sink failed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copy_stream_failure_keeps_connection() {
        let script = Script::new()
            .startup()
            .raw(b"G")
            .complete("COPY 0")
            .ready()
            .raw(b"H1\tone\n\\.\n")
            .complete("COPY 1")
            .ready()
            .select(&[("n", 23)], &[&[Some("1")]])
            .ready();
        let (mut conn, _) = connect(script).unwrap();

        conn.set_copy_input(FailingSource);
        let err = conn.execute("COPY t FROM STDIN").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CopyIo(_)), "{err}");

        conn.set_copy_output(FailingSink);
        let batch = conn.execute_batch("COPY t TO STDOUT").unwrap();
        assert!(matches!(batch[0].error().map(Error::kind), Some(ErrorKind::CopyIo(_))));

        assert!(!conn.is_closed());
        assert_eq!(conn.execute("SELECT 1").unwrap().rows().map(<[_]>::len), Some(1));
    }

    #[test]
    fn protocol_error_closes_connection() {
        let script = Script::new().startup().raw(b"?");
        let (mut conn, _) = connect(script).unwrap();

        let err = conn.execute("SELECT 1").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)), "{err}");
        assert!(conn.is_closed());
        assert!(matches!(conn.execute("SELECT 1").unwrap_err().kind(), ErrorKind::NotOpen(_)));
    }

    struct SharedSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn connect_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let script = Script::new()
            .auth(5, b"\x01\x02\x03\x04")
            .startup()
            .select(&[("n", 23)], &[&[Some("420")]])
            .ready()
            .into_bytes();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(&script).unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).unwrap();
            received
        });

        let dsn = format!("host=127.0.0.1 port={port} dbname=app user=alice password=secret");
        let mut conn = Connection::connect(&dsn).unwrap();
        let (n,) = conn.execute("SELECT 420").unwrap().into_rows().remove(0).decode::<(i32,)>().unwrap();
        assert_eq!(n, 420);
        conn.close().unwrap();

        let received = server.join().unwrap();
        let inner = format!("{:x}", Md5::digest(b"secretalice"));
        let mut outer = inner.into_bytes();
        outer.extend(b"\x01\x02\x03\x04");
        let expected = format!("md5{:x}\0", Md5::digest(&outer));
        assert_eq!(&received[300..300 + expected.len()], expected.as_bytes());
        assert_eq!(received.last(), Some(&b'X'));
    }

    #[test]
    fn connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = Connection::connect(&format!("host=127.0.0.1 port={port}")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConnectFailed(_)), "{err}");
    }

    #[test]
    fn config_rejected_before_connect() {
        let err = Connection::connect(&format!("user={}", "u".repeat(40))).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)), "{err}");
    }
}
