use std::io::{Read, Write};
use barepg::{
    Connection, Result,
    large_object::{INV_READ, INV_WRITE},
};

pub fn main() -> Result<()> {
    let mut conn = Connection::connect_env()?;
    let mut tx = conn.begin()?;

    let lobj = tx.lo_create(INV_READ | INV_WRITE)?;
    let mut handle = tx.lo_open(lobj, INV_READ | INV_WRITE)?;
    handle.write_all(b"large object content").unwrap();
    handle.close()?;
    drop(handle);

    let mut handle = tx.lo_open(lobj, INV_READ)?;
    let mut content = String::new();
    handle.read_to_string(&mut content).unwrap();
    assert_eq!(content, "large object content");
    drop(handle);

    tx.lo_unlink(lobj)?;
    tx.commit()?;
    Ok(())
}
