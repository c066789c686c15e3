//! Postgres Protocol Operations
//!
//! The [`Protocol`] state machine reads one tagged backend message at a time and applies
//! it to the connection state.
//!
//! ```text
//! Connecting -> Authenticating -> Ready -> AwaitingResponse -> Ready ...
//! ```
use bytes::Bytes;
use md5::{Digest, Md5};
use std::{
    collections::VecDeque,
    fmt,
    io::{self, BufRead, Write},
    sync::Arc,
    time::Duration,
};

use crate::{
    Error, ErrorKind, Result, Row, Value,
    common::{ByteStr, span, verbose, warn},
    connection::{NotOpen, NotifyTimeout},
    postgres::{
        BackendMessage, BackendProtocol, PgFormat, ProtocolError,
        backend,
        frontend::{FnArg, FunctionCall, PasswordPacket, Query, Startup, Terminate},
    },
    query::QueryResult,
    row::Column,
    stream::PgStream,
    types::{Decoder, TypeRegistry},
};

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Socket opened, startup packet not yet answered.
    Connecting,
    /// Authentication exchange in progress.
    Authenticating,
    /// Ready for a new query cycle.
    Ready,
    /// Query or function call sent, consuming responses until ready.
    AwaitingResponse,
    /// Connection terminated.
    Closed,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::Authenticating => "startup phase",
            Phase::Ready => "idle",
            Phase::AwaitingResponse => "awaiting response",
            Phase::Closed => "closed",
        }
    }
}

/// Asynchronous notification raised by `NOTIFY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    channel: ByteStr,
    process_id: i32,
}

impl Notification {
    /// Returns the notification channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the process id of the notifying backend.
    pub const fn process_id(&self) -> i32 {
        self.process_id
    }
}

/// Source of copy-in data.
pub type CopyIn = Box<dyn BufRead + Send>;

/// Sink of copy-out data.
pub type CopyOut = Box<dyn Write + Send>;

/// Postgres protocol 2.0 state machine.
pub(crate) struct Protocol {
    pub(crate) io: PgStream,
    phase: Phase,
    authenticated: bool,
    user: ByteStr,
    password: ByteStr,
    key: Option<backend::BackendKeyData>,
    notifies: VecDeque<Notification>,
    /// Results of the in-flight query, the last entry is the current result.
    batch: Option<Vec<QueryResult>>,
    decoders: Vec<Decoder>,
    func_result: Option<Bytes>,
    /// Error of a function call, raised once the backend is ready.
    deferred: Option<Error>,
    copy_in: Option<CopyIn>,
    copy_out: Option<CopyOut>,
}

impl Protocol {
    pub fn new(io: PgStream, user: ByteStr, password: ByteStr) -> Self {
        Self {
            io,
            phase: Phase::Connecting,
            authenticated: false,
            user,
            password,
            key: None,
            notifies: VecDeque::new(),
            batch: None,
            decoders: Vec::new(),
            func_result: None,
            deferred: None,
            copy_in: None,
            copy_out: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn backend_key(&self) -> Option<backend::BackendKeyData> {
        self.key
    }

    pub fn set_copy_in(&mut self, source: Option<CopyIn>) {
        self.copy_in = source;
    }

    pub fn set_copy_out(&mut self, sink: Option<CopyOut>) {
        self.copy_out = sink;
    }

    /// Perform the startup and authentication exchange.
    ///
    /// <https://www.postgresql.org/docs/7.3/protocol-protocol.html#AEN83911>
    pub fn startup(&mut self, startup: Startup, types: &TypeRegistry) -> Result<()> {
        span!("startup");
        self.io.send_startup(startup);
        self.io.flush()?;
        self.phase = Phase::Authenticating;
        self.run_until_ready(types)
    }

    /// Perform a simple query, returns a result per statement.
    ///
    /// The trailing result opened by the last command tag is dropped.
    pub fn query(&mut self, sql: &str, types: &TypeRegistry) -> Result<Vec<QueryResult>> {
        span!("query");
        self.ensure_ready()?;
        verbose!(sql, "simple query");

        self.batch = Some(vec![QueryResult::default()]);
        self.decoders.clear();
        self.io.send(Query { sql });

        let result = self.io.flush().and_then(|_| {
            self.phase = Phase::AwaitingResponse;
            self.run_until_ready(types)
        });
        let batch = self.batch.take().unwrap_or_default();
        result?;

        Ok(close_batch(batch))
    }

    /// Perform a function call, returns the opaque result.
    pub fn function_call(
        &mut self,
        oid: u32,
        args: &[FnArg],
        types: &TypeRegistry,
    ) -> Result<Option<Bytes>> {
        span!("function_call", oid);
        self.ensure_ready()?;

        self.func_result = None;
        self.deferred = None;
        self.io.send(FunctionCall { oid, args });
        self.io.flush()?;
        self.phase = Phase::AwaitingResponse;
        self.run_until_ready(types)?;

        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        Ok(self.func_result.take())
    }

    /// Pop the oldest notification, waiting for the backend if none queued.
    ///
    /// `None` timeout block indefinitely, zero duration poll once.
    pub fn wait_for_notify(&mut self, timeout: Option<Duration>, types: &TypeRegistry) -> Result<Notification> {
        loop {
            if let Some(notify) = self.notifies.pop_front() {
                return Ok(notify);
            }
            if self.phase == Phase::Closed {
                return Err(NotOpen.into());
            }
            match self.io.wait_response(timeout) {
                Ok(true) => self.read_response(types).inspect_err(|err| self.check_open(err))?,
                Ok(false) => return Err(NotifyTimeout.into()),
                Err(err) => {
                    self.check_open(&err);
                    return Err(err);
                }
            }
        }
    }

    /// Send termination message and close the socket.
    pub fn terminate(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(NotOpen.into());
        }
        self.phase = Phase::Closed;
        self.batch = None;
        self.io.send(Terminate);
        let flushed = self.io.flush();
        let closed = self.io.close();
        flushed.and(closed)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Closed => Err(NotOpen.into()),
            phase => Err(Error::programming(format!(
                "operation requested while connection is {}",
                phase.name(),
            ))),
        }
    }

    /// A protocol error leaves the stream out of sync, the connection is closed.
    fn check_open(&mut self, err: &Error) {
        if matches!(err.kind(), ErrorKind::Protocol(_)) && self.io.is_open() {
            verbose!(%err, "closing connection");
            let _ = self.io.close();
        }
        if !self.io.is_open() {
            self.phase = Phase::Closed;
        }
    }

    fn run_until_ready(&mut self, types: &TypeRegistry) -> Result<()> {
        while self.phase != Phase::Ready {
            if let Err(err) = self.read_response(types) {
                self.check_open(&err);
                return Err(err);
            }
        }
        Ok(())
    }

    fn current(&mut self) -> Option<&mut QueryResult> {
        self.batch.as_mut().and_then(|batch| batch.last_mut())
    }

    fn new_result(&mut self) {
        if let Some(batch) = self.batch.as_mut() {
            batch.push(QueryResult::default());
        }
        self.decoders.clear();
    }

    fn unexpected(&self, msgtype: u8) -> Error {
        ProtocolError::unexpected_phase(msgtype, self.phase.name()).into()
    }

    /// Read and handle a single backend message.
    pub fn read_response(&mut self, types: &TypeRegistry) -> Result<()> {
        let msgtype = self.io.read_u8()?;
        verbose!(message = BackendMessage::message_name(msgtype), "backend message");

        if msgtype == PgFormat::Text.msgtype() {
            return self.data_row(PgFormat::Text);
        }
        if msgtype == PgFormat::Binary.msgtype() {
            return self.data_row(PgFormat::Binary);
        }

        use BackendMessage::*;
        match BackendMessage::read(msgtype, &mut self.io)? {
            Authentication(auth) => self.authentication(auth)?,
            BackendKeyData(key) => self.key = Some(key),
            NotificationResponse(notify) => self.notifies.push_back(Notification {
                channel: notify.channel,
                process_id: notify.process_id,
            }),
            RowDescription(desc) => self.row_description(desc, types)?,
            CommandComplete(cmd) => self.complete(msgtype, cmd.tag)?,
            // an empty query completes with empty command tag
            EmptyQueryResponse(_) => self.complete(msgtype, ByteStr::default())?,
            ErrorResponse(err) => self.error_response(err)?,
            NoticeResponse(notice) => match self.current() {
                Some(current) => current.messages.push(notice.message),
                None => {
                    warn!("{notice}");
                    let _ = notice;
                },
            },
            CursorResponse(_cursor) => {
                verbose!(cursor = %_cursor.name, "cursor response");
            },
            CopyInResponse(_) => self.copy_in()?,
            CopyOutResponse(_) => self.copy_out()?,
            FunctionResultResponse(res) => self.func_result = res.value,
            ReadyForQuery(_) => self.phase = Phase::Ready,
        }

        Ok(())
    }

    fn complete(&mut self, msgtype: u8, tag: ByteStr) -> Result<()> {
        let Some(current) = self.current() else {
            return Err(self.unexpected(msgtype));
        };
        current.completed = Some(tag);
        self.new_result();
        Ok(())
    }

    /// Attach a local failure to the current result, or to the function call.
    fn attach(&mut self, err: Error) {
        match self.current() {
            Some(current) => {
                current.error.get_or_insert(err);
            },
            None => {
                self.deferred.get_or_insert(err);
            },
        }
    }

    fn authentication(&mut self, auth: backend::Authentication) -> Result<()> {
        use backend::Authentication;
        match auth {
            Authentication::Ok => self.authenticated = true,
            Authentication::KerberosV4 => Err(UnsupportedAuth { method: "Kerberos V4" })?,
            Authentication::KerberosV5 => Err(UnsupportedAuth { method: "Kerberos V5" })?,
            Authentication::CryptPassword { .. } => Err(UnsupportedAuth { method: "crypt" })?,
            Authentication::CleartextPassword => {
                self.io.send_password(PasswordPacket { password: &self.password });
                self.io.flush()?;
            },
            Authentication::MD5Password { salt } => {
                let password = md5_password(&self.user, &self.password, salt);
                self.io.send_password(PasswordPacket { password: &password });
                self.io.flush()?;
            },
        }
        Ok(())
    }

    fn error_response(&mut self, err: backend::ErrorResponse) -> Result<()> {
        if let Some(current) = self.current() {
            current.error = Some(err.into());
            self.new_result();
            return Ok(());
        }

        match self.phase {
            Phase::Connecting | Phase::Authenticating if !self.authenticated => Err(Error::auth_failed(err)),
            // keep consuming until ready, so the stream stays in sync
            Phase::AwaitingResponse => {
                self.deferred.get_or_insert(err.into());
                Ok(())
            },
            _ => Err(err.into()),
        }
    }

    fn row_description(&mut self, desc: backend::RowDescription, types: &TypeRegistry) -> Result<()> {
        let mut decoders = Vec::with_capacity(desc.fields.len());
        let columns = desc
            .fields
            .into_iter()
            .map(|field| {
                let entry = types.resolve(field.oid);
                decoders.push(entry.decoder());
                Column {
                    name: field.name,
                    oid: field.oid,
                    category: entry.category(),
                    size: field.size,
                    modifier: field.modifier,
                }
            })
            .collect::<Arc<[Column]>>();

        let Some(current) = self.current() else {
            return Err(self.unexpected(backend::RowDescription::MSGTYPE));
        };
        current.description = Some(columns);
        current.rows = Some(Vec::new());
        self.decoders = decoders;
        Ok(())
    }

    fn data_row(&mut self, format: PgFormat) -> Result<()> {
        let field_len = self.decoders.len();
        let row = backend::DataRow::read(&mut self.io, field_len, format)?;

        let decoders = &self.decoders;
        let values = row
            .values
            .iter()
            .zip(decoders)
            .map(|(raw, decode)| match raw {
                Some(raw) => decode(&raw[..]),
                None => Ok(Value::Null),
            })
            .collect::<Result<Vec<_>, _>>();

        let Some(QueryResult { description: Some(columns), rows: Some(rows), error, .. })
            = self.batch.as_mut().and_then(|batch| batch.last_mut())
        else {
            return Err(self.unexpected(format.msgtype()));
        };

        match values {
            Ok(values) => rows.push(Row::new(columns.clone(), values)),
            Err(err) => {
                verbose!(%err, "row skipped");
                error.get_or_insert(err.into());
            },
        }
        Ok(())
    }

    /// Forward copy-in source line by line, until end of input or the end marker.
    fn copy_in(&mut self) -> Result<()> {
        span!("copy_in");
        let mut stdin;
        let source: &mut dyn BufRead = match self.copy_in.as_mut() {
            Some(source) => source,
            None => {
                stdin = io::stdin().lock();
                &mut stdin
            },
        };

        let mut line = Vec::new();
        let mut last_newline = true;
        let read = loop {
            line.clear();
            match source.read_until(b'\n', &mut line) {
                Ok(0) => break Ok(()),
                Ok(_) if line.strip_suffix(b"\n").unwrap_or(&line) == b"\\." => break Ok(()),
                Ok(_) => {
                    self.io.send_raw(&line);
                    last_newline = line.ends_with(b"\n");
                },
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };

        if !last_newline {
            self.io.send_raw(b"\n");
        }
        self.io.send_raw(b"\\.\n");
        self.io.flush()?;

        if let Err(err) = read {
            self.attach(Error::copy_io(err).context("copy in source"));
        }
        Ok(())
    }

    /// Write copy-out lines to the sink, until the end marker.
    fn copy_out(&mut self) -> Result<()> {
        span!("copy_out");
        let mut stdout;
        let sink: &mut dyn Write = match self.copy_out.as_mut() {
            Some(sink) => sink,
            None => {
                stdout = io::stdout().lock();
                &mut stdout
            },
        };

        let mut written = Ok(());
        loop {
            let line = self.io.read_until(b'\n')?;
            if &line[..] == b"\\." {
                break;
            }
            if written.is_ok() {
                written = sink.write_all(&line).and_then(|_| sink.write_all(b"\n"));
            }
        }

        if let Err(err) = written.and_then(|_| sink.flush()) {
            self.attach(Error::copy_io(err).context("copy out sink"));
        }
        Ok(())
    }
}

/// Drop the trailing result opened by the last command tag.
///
/// Notices received after the last command tag belong to the last statement.
fn close_batch(mut batch: Vec<QueryResult>) -> Vec<QueryResult> {
    let untouched = batch.last().is_some_and(|last| {
        last.completed.is_none() && last.error.is_none() && last.description.is_none()
    });
    if untouched && batch.len() > 1 {
        if let Some(last) = batch.pop() {
            if let Some(prev) = batch.last_mut() {
                prev.messages.extend(last.messages);
            }
        }
    }
    batch
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8;4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password);
    md5.update(user);
    let inner = format!("{:x}", md5.finalize_reset());
    md5.update(inner);
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// An error when server request unsupported authentication method.
pub struct UnsupportedAuth {
    method: &'static str,
}

impl UnsupportedAuth {
    /// Returns the requested authentication method.
    pub fn method(&self) -> &str {
        self.method
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} authentication is required by server, but not supported by this client", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::{Socket, memory::Memory};

    fn protocol(input: &[u8]) -> Protocol {
        let io = PgStream::new(Socket::memory(Memory::new(input.to_vec()).chunked(3)));
        Protocol::new(io, "alice".into(), "secret".into())
    }

    fn startup() -> Startup<'static> {
        Startup { database: "app", user: "alice", options: "" }
    }

    #[test]
    fn md5_vector() {
        assert_eq!(md5_password("alice", "secret", [1, 2, 3, 4]), "md598a0412b9c31436fc53776e863350083");
    }

    #[test]
    fn phases() {
        let mut proto = protocol(b"R\0\0\0\0K\0\0\0\x01\0\0\0\x02ZC\0Z");
        assert_eq!(proto.phase(), Phase::Connecting);
        proto.startup(startup(), &TypeRegistry::new()).unwrap();
        assert_eq!(proto.phase(), Phase::Ready);
        assert_eq!(proto.backend_key().map(|key| key.process_id), Some(1));

        let batch = proto.query(";", &TypeRegistry::new()).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].command_tag(), Some(""));

        proto.terminate().unwrap();
        assert_eq!(proto.phase(), Phase::Closed);
    }

    #[test]
    fn startup_error_before_auth() {
        let mut proto = protocol(b"EFATAL:  database \"nope\" does not exist\n\0");
        let err = proto.startup(startup(), &TypeRegistry::new()).unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::AuthFailed(_)), "{err}");
    }

    #[test]
    fn trailing_notice_moves_to_last_result() {
        let mut first = QueryResult::default();
        first.completed = Some("SELECT".into());
        let mut trailing = QueryResult::default();
        trailing.messages.push("NOTICE:  late\n".into());

        let batch = close_batch(vec![first, trailing]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].messages().len(), 1);
    }

    #[test]
    fn notice_outside_statement() {
        let mut proto = protocol(b"R\0\0\0\0NNOTICE:  hello\n\0Z");
        proto.startup(startup(), &TypeRegistry::new()).unwrap();
        assert_eq!(proto.phase(), Phase::Ready);
    }
}
