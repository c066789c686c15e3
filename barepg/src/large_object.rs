//! Large object access through server functions.
use bytes::Bytes;
use std::{fmt, io};

use crate::{
    Connection, Result,
    common::warn,
    connection::NotOpen,
    postgres::frontend::FnArg,
};

/// Open large object for writing.
pub const INV_WRITE: i32 = 0x0002_0000;
/// Open large object for reading.
pub const INV_READ: i32 = 0x0004_0000;

/// Seek from the start of the object.
pub const SEEK_SET: i32 = 0;
/// Seek from the current position.
pub const SEEK_CUR: i32 = 1;
/// Seek from the end of the object.
pub const SEEK_END: i32 = 2;

/// An open large object, see [`Connection::lo_open`].
///
/// Each operation is a function call to the backend. Large object descriptors are only
/// valid inside a transaction.
///
/// The handle is closed when dropped.
pub struct LargeObject<'c> {
    conn: &'c mut Connection,
    fd: Option<i32>,
}

impl<'c> LargeObject<'c> {
    pub(crate) fn new(conn: &'c mut Connection, fd: i32) -> Self {
        Self { conn, fd: Some(fd) }
    }

    /// Returns the large object descriptor, [`None`] if closed.
    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    fn open_fd(&self) -> Result<i32> {
        match self.fd {
            Some(fd) => Ok(fd),
            None => Err(NotOpen.into()),
        }
    }

    /// Read at most `len` bytes, an empty buffer means end of object.
    pub fn read(&mut self, len: i32) -> Result<Bytes> {
        let fd = self.open_fd()?;
        let oid = self.conn.lo_function("loread")?;
        let data = self.conn.funcall(oid, &[FnArg::Int(fd), FnArg::Int(len)])?;
        Ok(data.unwrap_or_default())
    }

    /// Write bytes, returns the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> Result<i32> {
        let fd = self.open_fd()?;
        let oid = self.conn.lo_function("lowrite")?;
        self.conn.funcall_int(oid, &[FnArg::Int(fd), FnArg::Bytes(data)])
    }

    /// Move the position, `whence` is one of [`SEEK_SET`], [`SEEK_CUR`] or [`SEEK_END`].
    ///
    /// Returns the new position.
    pub fn seek(&mut self, offset: i32, whence: i32) -> Result<i32> {
        let fd = self.open_fd()?;
        let oid = self.conn.lo_function("lo_lseek")?;
        self.conn.funcall_int(oid, &[FnArg::Int(fd), FnArg::Int(offset), FnArg::Int(whence)])
    }

    /// Returns the current position.
    pub fn tell(&mut self) -> Result<i32> {
        let fd = self.open_fd()?;
        let oid = self.conn.lo_function("lo_tell")?;
        self.conn.funcall_int(oid, &[FnArg::Int(fd)])
    }

    /// Close the descriptor, any further operation returns [`NotOpen`].
    pub fn close(&mut self) -> Result<()> {
        let fd = self.open_fd()?;
        let oid = self.conn.lo_function("lo_close")?;
        self.fd = None;
        self.conn.funcall(oid, &[FnArg::Int(fd)])?;
        Ok(())
    }
}

fn into_io(err: crate::Error) -> io::Error {
    io::Error::other(err)
}

fn offset(value: impl TryInto<i32>) -> io::Result<i32> {
    value
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "large object offset out of range"))
}

impl io::Read for LargeObject<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(i32::MAX as usize) as i32;
        let data = LargeObject::read(self, len).map_err(into_io)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

impl io::Write for LargeObject<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let buf = &buf[..buf.len().min(i32::MAX as usize)];
        let written = LargeObject::write(self, buf).map_err(into_io)?;
        usize::try_from(written).map_err(|_| io::Error::other("large object write failed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for LargeObject<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(n) => (offset(n)?, SEEK_SET),
            io::SeekFrom::Current(n) => (offset(n)?, SEEK_CUR),
            io::SeekFrom::End(n) => (offset(n)?, SEEK_END),
        };
        let pos = LargeObject::seek(self, offset, whence).map_err(into_io)?;
        u64::try_from(pos).map_err(|_| io::Error::other("large object seek failed"))
    }
}

impl Drop for LargeObject<'_> {
    fn drop(&mut self) {
        if self.fd.is_none() || self.conn.is_closed() {
            return;
        }
        if let Err(_err) = self.close() {
            warn!("failed to close large object: {_err}");
        }
    }
}

impl fmt::Debug for LargeObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeObject").field("fd", &self.fd).finish()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;
    use crate::{ErrorKind, connection::mock::{Script, connect}};

    const FUNCS: &[(&str, &str)] = &[
        ("lo_open", "952"),
        ("lo_close", "953"),
        ("loread", "954"),
        ("lowrite", "955"),
        ("lo_lseek", "956"),
        ("lo_creat", "957"),
        ("lo_tell", "958"),
        ("lo_unlink", "964"),
    ];

    fn lookup(script: Script) -> Script {
        let rows = FUNCS.iter().map(|(name, oid)| [Some(*name), Some(*oid)]).collect::<Vec<_>>();
        let rows = rows.iter().map(|row| &row[..]).collect::<Vec<_>>();
        script.select(&[("proname", 19), ("oid", 26)], &rows).ready()
    }

    fn int(script: Script, value: i32) -> Script {
        script.function_result(Some(&value.to_be_bytes())).ready()
    }

    /// Function call oids sent, in order.
    fn calls(output: &std::sync::Mutex<Vec<u8>>) -> Vec<u32> {
        let output = output.lock().unwrap();
        output
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w == b"F\0")
            .map(|(i, _)| u32::from_be_bytes(output[i + 2..i + 6].try_into().unwrap()))
            .collect()
    }

    #[test]
    fn create_write_read() {
        let script = lookup(Script::new().startup());
        let script = int(script, 17001); // lo_creat
        let script = int(script, 0); // lo_open
        let script = int(script, 0); // lo_lseek
        let script = int(script, 5); // lowrite
        let script = int(script, 0); // lo_lseek
        let script = script.function_result(Some(b"hello")).ready(); // loread
        let script = int(script, 5); // lo_tell
        let script = script.function_result(Some(b"\0\0\0\0")).ready(); // lo_close
        let (mut conn, output) = connect(script).unwrap();

        let lobj = conn.lo_create(INV_READ | INV_WRITE).unwrap();
        assert_eq!(lobj, 17001);

        let mut handle = conn.lo_open(lobj, INV_READ | INV_WRITE).unwrap();
        assert_eq!(handle.write(b"hello").unwrap(), 5);
        assert_eq!(handle.seek(0, SEEK_SET).unwrap(), 0);
        assert_eq!(&handle.read(5).unwrap()[..], b"hello");
        assert_eq!(handle.tell().unwrap(), 5);
        handle.close().unwrap();

        assert!(matches!(handle.read(1).unwrap_err().kind(), ErrorKind::NotOpen(_)));
        assert!(matches!(handle.close().unwrap_err().kind(), ErrorKind::NotOpen(_)));
        drop(handle);

        assert_eq!(calls(&output), [957, 952, 956, 955, 956, 954, 958, 953]);
    }

    #[test]
    fn std_io() {
        let script = lookup(Script::new().startup());
        let script = int(script, 3); // lo_open
        let script = int(script, 0); // lo_lseek
        let script = int(script, 3); // lowrite
        let script = int(script, 1); // lo_lseek
        let script = script.function_result(Some(b"bc")).ready(); // loread
        let script = script.function_result(None).ready(); // loread
        let script = int(script, 0); // lo_close
        let (mut conn, output) = connect(script).unwrap();

        let mut handle = conn.lo_open(17001, INV_READ | INV_WRITE).unwrap();
        handle.write_all(b"abc").unwrap();
        assert_eq!(Seek::seek(&mut handle, SeekFrom::Start(1)).unwrap(), 1);
        let mut buf = Vec::new();
        handle.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"bc");
        drop(handle);

        assert_eq!(calls(&output), [952, 956, 955, 956, 954, 954, 953]);
    }

    #[test]
    fn unlink() {
        let script = lookup(Script::new().startup());
        let script = int(script, 1);
        let (mut conn, output) = connect(script).unwrap();
        conn.lo_unlink(17001).unwrap();
        assert_eq!(calls(&output), [964]);
    }

    #[test]
    fn lookup_once() {
        let script = lookup(Script::new().startup());
        let script = int(script, 1);
        let script = int(script, 1);
        let (mut conn, output) = connect(script).unwrap();
        conn.lo_unlink(1).unwrap();
        conn.lo_unlink(2).unwrap();

        let lookups = crate::connection::mock::queries(&output)
            .into_iter()
            .filter(|sql| sql.contains("pg_proc"))
            .count();
        assert_eq!(lookups, 1);
    }

    #[test]
    fn missing_function() {
        let script = Script::new()
            .startup()
            .select(&[("proname", 19), ("oid", 26)], &[])
            .ready();
        let (mut conn, _) = connect(script).unwrap();
        let err = conn.lo_create(INV_WRITE).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Programming(_)), "{err}");
    }
}
