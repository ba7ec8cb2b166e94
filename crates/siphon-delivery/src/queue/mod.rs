//! Crash-safe outbound queue
//!
//! Payloads are stored in a per-sink SQLite file. Each item is `pending` until a worker
//! leases it and is deleted when the worker acknowledges delivery. Items that were leased
//! when the process stopped go back to `pending` the next time the queue is opened, so every
//! appended payload is delivered at least once.
//!
//! Leases are handed out lowest id first, but with more than one worker per sink the order
//! in which payloads reach the sink is not guaranteed.

mod schema;

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use schema::{STATE_LEASED, STATE_PENDING};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long a waiting `lease` sleeps before checking the table again without a wakeup
const LEASE_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// A payload claimed by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub payload: Vec<u8>,
}

/// Shared handle to one sink's queue. Clones refer to the same database.
#[derive(Clone)]
pub struct DurableQueue {
    db: Arc<Mutex<Connection>>,
    notify: Arc<Notify>,
    path: Option<PathBuf>,
}

impl DurableQueue {
    /// Open (or create) the queue stored at `path` and return leased items to `pending`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened queue database");

        Self::from_connection(conn, Some(path))
    }

    /// Create a queue that lives only as long as the handle (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        schema::init_schema(&conn)?;

        let recovered = conn.execute(
            "UPDATE queue_items SET state = ?1, leased_at = NULL WHERE state = ?2",
            params![STATE_PENDING, STATE_LEASED],
        )?;
        if recovered > 0 {
            info!(items = recovered, "Returned items leased before shutdown to the queue");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
            path,
        })
    }

    /// Location of the queue database, `None` for in-memory queues
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Durably store `payload` as pending and return its id.
    pub fn append(&self, payload: &[u8]) -> Result<i64> {
        let id = {
            let conn = self.db.lock()?;
            conn.execute(
                "INSERT INTO queue_items (payload, state, enqueued_at) VALUES (?1, ?2, ?3)",
                params![payload, STATE_PENDING, unix_now()],
            )?;
            conn.last_insert_rowid()
        };
        self.notify.notify_one();
        Ok(id)
    }

    /// Lease the oldest pending item, if there is one.
    pub fn try_lease(&self) -> Result<Option<QueueItem>> {
        let (item, more) = {
            let conn = self.db.lock()?;
            let item = conn
                .query_row(
                    r#"
                    UPDATE queue_items SET state = ?1, leased_at = ?2
                    WHERE id = (
                        SELECT id FROM queue_items WHERE state = ?3 ORDER BY id LIMIT 1
                    )
                    RETURNING id, payload
                    "#,
                    params![STATE_LEASED, unix_now(), STATE_PENDING],
                    |row| {
                        Ok(QueueItem {
                            id: row.get(0)?,
                            payload: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            let more = item.is_some() && count_state(&conn, STATE_PENDING)? > 0;
            (item, more)
        };

        // Pass the wakeup on so another idle worker picks up the remaining items.
        if more {
            self.notify.notify_one();
        }
        Ok(item)
    }

    /// Wait for a pending item and lease it. Returns `None` once `cancel` fires.
    pub async fn lease(&self, cancel: &CancellationToken) -> Result<Option<QueueItem>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(item) = self.try_lease()? {
                return Ok(Some(item));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep(LEASE_RECHECK_INTERVAL) => {},
            }
        }
    }

    /// Mark a leased item delivered. Unknown or already-acked ids are ignored.
    pub fn ack(&self, id: i64) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Return a leased item to `pending` so any worker can take it.
    pub fn release(&self, id: i64) -> Result<()> {
        let changed = {
            let conn = self.db.lock()?;
            conn.execute(
                "UPDATE queue_items SET state = ?1, leased_at = NULL WHERE id = ?2 AND state = ?3",
                params![STATE_PENDING, id, STATE_LEASED],
            )?
        };
        if changed > 0 {
            self.notify.notify_one();
        }
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        count_state(&conn, STATE_PENDING)
    }

    pub fn leased_count(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        count_state(&conn, STATE_LEASED)
    }

    /// Items not yet acknowledged
    pub fn len(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM queue_items", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn count_state(conn: &Connection, state: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM queue_items WHERE state = ?1",
        params![state],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_append_lease_ack() {
        let queue = DurableQueue::open_in_memory().unwrap();
        let id = queue.append(b"one").unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);

        let item = queue.try_lease().unwrap().unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.payload, b"one");
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(queue.leased_count().unwrap(), 1);

        queue.ack(item.id).unwrap();
        assert!(queue.is_empty().unwrap());
        assert!(queue.try_lease().unwrap().is_none());

        // acking twice or acking an unknown id is harmless
        queue.ack(item.id).unwrap();
        queue.ack(9999).unwrap();
    }

    #[test]
    fn test_lease_order_is_oldest_first() {
        let queue = DurableQueue::open_in_memory().unwrap();
        for payload in [b"a", b"b", b"c"] {
            queue.append(payload).unwrap();
        }
        let order: Vec<Vec<u8>> = std::iter::from_fn(|| queue.try_lease().unwrap())
            .map(|item| item.payload)
            .collect();
        assert_eq!(order, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_release_makes_item_available_again() {
        let queue = DurableQueue::open_in_memory().unwrap();
        queue.append(b"x").unwrap();

        let item = queue.try_lease().unwrap().unwrap();
        assert!(queue.try_lease().unwrap().is_none());

        queue.release(item.id).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);
        let again = queue.try_lease().unwrap().unwrap();
        assert_eq!(again, item);
    }

    #[test]
    fn test_reopen_recovers_leased_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site1.db");

        let (acked, leased) = {
            let queue = DurableQueue::open(&path).unwrap();
            queue.append(b"first").unwrap();
            queue.append(b"second").unwrap();
            queue.append(b"third").unwrap();

            let acked = queue.try_lease().unwrap().unwrap();
            queue.ack(acked.id).unwrap();
            let leased = queue.try_lease().unwrap().unwrap();
            (acked, leased)
        };

        let queue = DurableQueue::open(&path).unwrap();
        assert_eq!(queue.leased_count().unwrap(), 0);
        assert_eq!(queue.pending_count().unwrap(), 2);

        let ids: Vec<i64> = std::iter::from_fn(|| queue.try_lease().unwrap())
            .map(|item| item.id)
            .collect();
        assert!(!ids.contains(&acked.id));
        assert_eq!(ids.iter().filter(|id| **id == leased.id).count(), 1);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_concurrent_leases_are_exclusive() {
        let queue = DurableQueue::open_in_memory().unwrap();
        for i in 0..5u8 {
            queue.append(&[i]).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || queue.try_lease().unwrap())
            })
            .collect();

        let leased: Vec<QueueItem> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        let ids: HashSet<i64> = leased.iter().map(|item| item.id).collect();
        assert_eq!(leased.len(), 5);
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_lease_waits_for_append() {
        let queue = DurableQueue::open_in_memory().unwrap();
        let cancel = CancellationToken::new();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.append(b"late").unwrap();
        });

        let item = tokio::time::timeout(Duration::from_secs(5), queue.lease(&cancel))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(item.payload, b"late");
    }

    #[tokio::test]
    async fn test_lease_returns_none_when_cancelled() {
        let queue = DurableQueue::open_in_memory().unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), queue.lease(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
