use std::env::var;
use barepg::{Config, Connection, Result};

pub fn main() -> Result<()> {
    let url = var("DATABASE_URL").unwrap();

    let mut conn = Connection::connect(&url)?;
    conn.execute("SELECT 1")?;
    conn.close()?;

    let mut conn = Connection::connect_env()?;
    conn.execute("SELECT 1")?;
    tracing::info!(pid = conn.backend_pid(), "connected");
    drop(conn);

    let config = Config::parse(&url)?.options("-c statement_timeout=5000");
    let mut conn = Connection::connect_with(config)?;
    let batch = conn.execute_batch("SELECT 1; SELECT 1/0; SELECT 3")?;
    assert_eq!(batch.len(), 3);
    assert!(batch[1].error().is_some());
    conn.close()?;

    Ok(())
}
