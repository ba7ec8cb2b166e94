//! SQLite schema for the outbound queue

use crate::error::Result;
use rusqlite::Connection;

pub(crate) const STATE_PENDING: &str = "pending";
pub(crate) const STATE_LEASED: &str = "leased";

/// Initialize queue database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload BLOB NOT NULL,

            -- pending | leased (acked rows are deleted)
            state TEXT NOT NULL DEFAULT 'pending',

            enqueued_at INTEGER NOT NULL,
            leased_at INTEGER
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_queue_items_state ON queue_items(state, id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'queue_items'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}
