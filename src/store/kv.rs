//! The small string-keyed integer table shared by the Block Store and each
//! plugin's projection store (§4.F "Key-value metadata").

use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;

pub fn ensure_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_int (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL,
            codec_tag INTEGER NOT NULL DEFAULT 0
        );",
    )?;
    Ok(())
}

pub fn get_int(conn: &Connection, key: &str) -> Result<Option<i64>, StoreError> {
    conn.query_row("SELECT value FROM kv_int WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .map_err(StoreError::from)
}

pub fn set_int(conn: &Connection, key: &str, value: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO kv_int (key, value, codec_tag) VALUES (?1, ?2, 0)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_updates_a_key() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_table(&conn).unwrap();
        assert_eq!(get_int(&conn, "missing").unwrap(), None);
        set_int(&conn, "head", 10).unwrap();
        assert_eq!(get_int(&conn, "head").unwrap(), Some(10));
        set_int(&conn, "head", 11).unwrap();
        assert_eq!(get_int(&conn, "head").unwrap(), Some(11));
    }
}
