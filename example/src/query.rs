use barepg::{Connection, FromRow, Params, Result, ScrollMode, Value};

#[derive(Debug, FromRow)]
struct Post {
    id: i32,
    name: String,
}

#[derive(Debug, FromRow)]
struct PostTuple(i32, String);

pub fn main() -> Result<()> {
    let mut conn = Connection::connect_env()?;

    conn.execute("CREATE TEMP TABLE post(id serial, name text, meta json)")?;

    let mut tx = conn.begin()?;
    let params = Params::named()
        .set("name", "Deez")
        .set("meta", serde_json::json!({ "tags": ["a", "b"] }));
    let result = tx.execute_with("INSERT INTO post(name, meta) VALUES(%(name)s, %(meta)s)", &params)?;
    assert_eq!(result.rows_affected(), 1);
    tx.execute("INSERT INTO post(name) VALUES('Foo')")?;
    tx.commit()?;

    let mut cursor = conn.cursor();
    cursor.executemany(
        "INSERT INTO post(name) VALUES(%s)",
        ["Bar", "Baz"].map(|name| Params::positional().bind(name)),
    )?;

    cursor.execute("SELECT id, name FROM post ORDER BY id")?;
    assert_eq!(cursor.row_count(), 4);

    let first = cursor.fetchone()?.map(Post::from_row).transpose()?;
    tracing::info!(?first);

    cursor.scroll(-1, ScrollMode::Relative)?;
    for row in cursor.by_ref() {
        let post = row?.decode::<PostTuple>()?;
        tracing::info!(?post);
    }

    cursor.execute("SELECT meta FROM post WHERE meta IS NOT NULL")?;
    if let Some(row) = cursor.fetchone()? {
        let meta = row.try_get::<_, serde_json::Value>("meta")?;
        tracing::info!(%meta);
    }

    cursor.execute("SELECT now()")?;
    if let Some(row) = cursor.fetchone()? {
        let now = row.try_get::<_, time::OffsetDateTime>(0)?;
        tracing::info!(%now);
    }

    cursor.execute("SELECT now(), 1.5::numeric, '\\x00ff'::bytea")?;
    for value in cursor.fetchall()?.into_iter().flatten() {
        assert!(!matches!(value, Value::Null));
        tracing::info!(?value);
    }

    Ok(())
}
