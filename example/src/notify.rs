use std::time::Duration;
use barepg::{Connection, ErrorKind, Result};

pub fn main() -> Result<()> {
    let mut listener = Connection::connect_env()?;
    let mut notifier = Connection::connect_env()?;

    listener.execute("LISTEN jobs")?;
    notifier.execute("NOTIFY jobs")?;

    let notify = listener.wait_for_notify(Some(Duration::from_secs(5)))?;
    assert_eq!(notify.channel(), "jobs");
    assert_eq!(Some(notify.process_id()), notifier.backend_pid());

    let err = listener.wait_for_notify(Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout(_)));

    Ok(())
}
