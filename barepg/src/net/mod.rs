//! Blocking socket.
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    path::Path,
    time::Duration,
};

/// An either `TcpStream` or `UnixStream`.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(test)]
    Memory(memory::Memory),
}

macro_rules! each {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Kind::Tcp($s) => $body,
            #[cfg(unix)]
            Kind::Unix($s) => $body,
            #[cfg(test)]
            Kind::Memory($s) => $body,
        }
    };
}

impl Socket {
    pub fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = TcpStream::connect((host,port))?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    #[cfg(unix)]
    pub fn connect_socket(path: &Path) -> io::Result<Socket> {
        let socket = std::os::unix::net::UnixStream::connect(path)?;
        Ok(Socket { kind: Kind::Unix(socket) })
    }

    #[cfg(not(unix))]
    pub fn connect_socket(path: &Path) -> io::Result<Socket> {
        let _ = path;
        Err(io::Error::new(io::ErrorKind::Unsupported, "unix socket not supported"))
    }

    #[cfg(test)]
    pub(crate) fn memory(memory: memory::Memory) -> Socket {
        Socket { kind: Kind::Memory(memory) }
    }

    /// Read with timeout.
    ///
    /// `None` timeout block indefinitely, zero duration poll once.
    ///
    /// Returns `Ok(None)` if timeout expired before any data is available.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        let result = match timeout {
            None => return self.read(buf).map(Some),
            Some(t) if t.is_zero() => {
                self.set_nonblocking(true)?;
                let result = self.read(buf);
                self.set_nonblocking(false)?;
                result
            },
            Some(t) => {
                self.set_read_timeout(Some(t))?;
                let result = self.read(buf);
                self.set_read_timeout(None)?;
                result
            },
        };

        match result {
            Ok(n) => Ok(Some(n)),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set_nonblocking(&mut self, value: bool) -> io::Result<()> {
        each!(&mut self.kind, s => s.set_nonblocking(value))
    }

    fn set_read_timeout(&mut self, value: Option<Duration>) -> io::Result<()> {
        each!(&mut self.kind, s => s.set_read_timeout(value))
    }

    /// Shut down both halves of the connection.
    pub fn shutdown(&self) -> io::Result<()> {
        each!(&self.kind, s => s.shutdown(Shutdown::Both))
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        each!(&mut self.kind, s => s.read(buf))
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        each!(&mut self.kind, s => s.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        each!(&mut self.kind, s => s.flush())
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        each!(&self.kind, s => std::fmt::Debug::fmt(s, f))
    }
}
