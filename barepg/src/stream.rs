//! Buffered postgres stream.
use bytes::{Buf, Bytes, BytesMut};
use std::{
    io::{self, Read, Write},
    time::Duration,
};

use crate::{
    Result,
    common::{ByteStr, verbose},
    connection::NotOpen,
    net::Socket,
    postgres::frontend::{self, FrontendProtocol, PasswordPacket, Startup},
};

/// Size of a single socket read.
const CHUNK_SIZE: usize = 4096;

/// A buffered socket which can send and receive postgres message.
///
/// Sending is buffered, caller must call [`flush`][PgStream::flush] afterwards.
///
/// Any io error invalidates the socket, subsequent operations fail with [`NotOpen`].
#[derive(Debug)]
pub struct PgStream {
    socket: Option<Socket>,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl PgStream {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket: Some(socket),
            read_buf: BytesMut::with_capacity(CHUNK_SIZE),
            write_buf: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }

    /// Returns `true` if the socket is still open.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Buffer a frontend message.
    pub fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    /// Buffer the startup packet.
    pub fn send_startup(&mut self, startup: Startup) {
        startup.write(&mut self.write_buf);
    }

    /// Buffer the password packet.
    pub fn send_password(&mut self, password: PasswordPacket) {
        password.write(&mut self.write_buf);
    }

    /// Buffer raw bytes, used in copy-in mode.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Write all buffered messages to the socket.
    ///
    /// Interrupted writes are retried.
    pub fn flush(&mut self) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(NotOpen)?;
        let mut result = Ok(());

        while self.write_buf.has_remaining() {
            match socket.write(&self.write_buf) {
                Ok(0) => {
                    result = Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write to backend"));
                    break;
                },
                Ok(n) => self.write_buf.advance(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    result = Err(err);
                    break;
                },
            }
        }

        if let Err(err) = result.and_then(|_| socket.flush()) {
            self.invalidate();
            return Err(err.into());
        }

        Ok(())
    }

    /// Read exactly `n` bytes.
    pub fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        while self.read_buf.len() < n {
            self.fill()?;
        }
        Ok(self.read_buf.split_to(n).freeze())
    }

    /// Read until `terminator` is found.
    ///
    /// The terminator is consumed but not returned.
    pub fn read_until(&mut self, terminator: u8) -> Result<Bytes> {
        let mut searched = 0;
        loop {
            if let Some(i) = self.read_buf[searched..].iter().position(|&b| b == terminator) {
                let bytes = self.read_buf.split_to(searched + i).freeze();
                self.read_buf.advance(1);
                return Ok(bytes);
            }
            searched = self.read_buf.len();
            self.fill()?;
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?.get_u8())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_exact(2)?.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_exact(4)?.get_i32())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_exact(4)?.get_u32())
    }

    /// Read nul terminated string.
    pub fn read_nul_string(&mut self) -> Result<ByteStr> {
        Ok(ByteStr::from_utf8_lossy(self.read_until(b'\0')?))
    }

    /// Wait until there is something to read.
    ///
    /// `None` timeout block indefinitely, zero duration poll once.
    ///
    /// Returns `false` if timeout expired.
    pub fn wait_response(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !self.read_buf.is_empty() {
            return Ok(true);
        }

        let mut chunk = [0u8; CHUNK_SIZE];
        let socket = self.socket.as_mut().ok_or(NotOpen)?;

        let result = loop {
            match socket.read_timeout(&mut chunk, timeout) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => break result,
            }
        };

        match result {
            Ok(None) => Ok(false),
            Ok(Some(0)) => {
                self.invalidate();
                Err(closed().into())
            },
            Ok(Some(n)) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            },
            Err(err) => {
                self.invalidate();
                Err(err.into())
            },
        }
    }

    /// Shutdown and drop the socket.
    pub fn close(&mut self) -> Result<()> {
        let socket = self.socket.take().ok_or(NotOpen)?;
        self.read_buf.clear();
        self.write_buf.clear();
        if let Err(_err) = socket.shutdown() {
            verbose!("socket shutdown failed: {_err}");
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let socket = self.socket.as_mut().ok_or(NotOpen)?;

        let result = loop {
            match socket.read(&mut chunk) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => break result,
            }
        };

        match result {
            Ok(0) => {
                self.invalidate();
                Err(closed().into())
            },
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                Ok(())
            },
            Err(err) => {
                self.invalidate();
                Err(err.into())
            },
        }
    }

    /// Drop the socket, buffered bytes of a broken stream are never read.
    fn invalidate(&mut self) {
        self.socket = None;
        self.read_buf.clear();
        self.write_buf.clear();
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection to backend closed")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ErrorKind, net::memory::Memory, postgres::frontend::Query};

    fn stream(input: &[u8], chunk: usize) -> PgStream {
        PgStream::new(Socket::memory(Memory::new(input.to_vec()).chunked(chunk)))
    }

    #[test]
    fn read_exact_across_chunks() {
        let mut io = stream(b"\0\0\0\x2aabcdef", 3);
        assert_eq!(io.read_i32().unwrap(), 42);
        assert_eq!(&io.read_exact(4).unwrap()[..], b"abcd");
        assert_eq!(&io.read_exact(2).unwrap()[..], b"ef");
    }

    #[test]
    fn read_until_consumes_terminator() {
        let mut io = stream(b"SELECT 1\0line\nrest", 2);
        assert_eq!(io.read_nul_string().unwrap(), "SELECT 1");
        assert_eq!(&io.read_until(b'\n').unwrap()[..], b"line");
        assert_eq!(&io.read_exact(4).unwrap()[..], b"rest");
    }

    #[test]
    fn peer_closed() {
        let mut io = stream(b"ab", 0);
        let err = io.read_exact(3).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConnectionClosed(_)));
        assert!(!io.is_open());
        let err = io.read_exact(1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotOpen(_)));
    }

    #[test]
    fn peer_closed_discards_partial_message() {
        let mut io = stream(b"C\0\0\0", 0);
        assert_eq!(io.read_u8().unwrap(), b'C');
        assert!(io.read_exact(4).is_err());
        assert!(matches!(io.read_u8().unwrap_err().kind(), ErrorKind::NotOpen(_)));
        assert!(matches!(io.read_until(b'\0').unwrap_err().kind(), ErrorKind::NotOpen(_)));
    }

    #[test]
    fn interrupted_read_is_retried() {
        let mut io = PgStream::new(Socket::memory(Memory::new(b"Z".to_vec()).interrupt()));
        assert_eq!(io.read_u8().unwrap(), b'Z');
    }

    #[test]
    fn flush_writes_everything() {
        let memory = Memory::new(vec![]);
        let output = memory.output.clone();
        let mut io = PgStream::new(Socket::memory(memory));
        io.send(Query { sql: "SELECT 1" });
        io.send_raw(b"1\t2\n");
        io.flush().unwrap();
        assert_eq!(&output.lock().unwrap()[..], b"QSELECT 1\x001\t2\n");
    }

    #[test]
    fn wait_response_timeout() {
        let mut io = stream(b"", 0);
        assert!(!io.wait_response(Some(Duration::ZERO)).unwrap());
        assert!(!io.wait_response(Some(Duration::from_millis(5))).unwrap());
        assert!(io.is_open());

        let mut io = stream(b"A", 0);
        assert!(io.wait_response(Some(Duration::ZERO)).unwrap());
        assert_eq!(io.read_u8().unwrap(), b'A');
    }

    #[test]
    fn closed_stream() {
        let mut io = stream(b"", 0);
        io.close().unwrap();
        io.send(Query { sql: "SELECT 1" });
        assert!(matches!(io.flush().unwrap_err().kind(), ErrorKind::NotOpen(_)));
        assert!(matches!(io.close().unwrap_err().kind(), ErrorKind::NotOpen(_)));
    }
}
