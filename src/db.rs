/// Key-value persistence for kill records and statistics.
///
/// `KvStore` is the boundary the engine writes through. Writes are
/// fire-and-forget: a failed write is logged and the next write of the same
/// key simply replaces it.
///
/// `DbWriter` backs the store with SQLite (`rusqlite`, `bundled` feature).
/// The connection lives on a dedicated `std::thread` and receives commands
/// via a bounded sync channel; callers hold a cheap Clone + Send + Sync
/// handle. Reads open their own short-lived read-only connection so the
/// writer thread only ever writes.
///
/// `MemoryStore` is the in-process stand-in used by tests and when no
/// database path is configured.
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
};
use tokio::sync::oneshot;

const WRITER_QUEUE: usize = 512;

pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    /// Every entry whose key starts with `prefix`, sorted by key.
    fn load_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

// ---------------------------------------------------------------------------
// Commands sent to the writer thread
// ---------------------------------------------------------------------------

pub enum DbCommand {
    Put {
        key:   String,
        value: String,
    },
    Remove {
        key: String,
    },
    /// Replies once every command queued before it has been applied.
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// DbWriter: cheap handle, Clone + Send + Sync
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DbWriter {
    tx:   mpsc::SyncSender<DbCommand>,
    path: PathBuf,
}

impl DbWriter {
    fn enqueue(&self, cmd: DbCommand) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(_)) => tracing::warn!("DB writer queue full, dropping write"),
            Err(mpsc::TrySendError::Disconnected(_)) => tracing::warn!("DB writer stopped, dropping write"),
        }
    }

    /// Wait until every write queued so far has reached the database.
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DbCommand::Flush { reply: reply_tx })
            .map_err(|_| anyhow!("DB writer channel closed"))?;
        reply_rx.await.map_err(|_| anyhow!("DB reply channel closed"))
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(DbCommand::Shutdown);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for DbWriter {
    fn put(&self, key: &str, value: &str) {
        self.enqueue(DbCommand::Put { key: key.to_string(), value: value.to_string() });
    }

    fn remove(&self, key: &str) {
        self.enqueue(DbCommand::Remove { key: key.to_string() });
    }

    fn load_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![prefix], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// spawn_db_writer: initialises SQLite and starts the writer thread
// ---------------------------------------------------------------------------

/// Initialise SQLite at `db_path`, apply the schema, and spawn the writer
/// thread. Returns a `DbWriter` handle that can be cloned freely.
pub fn spawn_db_writer(db_path: &Path) -> Result<DbWriter> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    apply_schema(&conn)?;

    let (tx, rx) = mpsc::sync_channel::<DbCommand>(WRITER_QUEUE);

    std::thread::spawn(move || db_writer_loop(rx, conn));

    tracing::info!("SQLite writer started at {:?}", db_path);
    Ok(DbWriter { tx, path: db_path.to_path_buf() })
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous  = NORMAL;

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    ")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Writer loop (runs on its own std::thread)
// ---------------------------------------------------------------------------

fn db_writer_loop(rx: mpsc::Receiver<DbCommand>, conn: Connection) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            DbCommand::Put { key, value } => {
                if let Err(e) = conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                ) {
                    tracing::warn!("DB put {} error: {}", key, e);
                }
            }

            DbCommand::Remove { key } => {
                if let Err(e) = conn.execute("DELETE FROM kv WHERE key = ?1", params![key]) {
                    tracing::warn!("DB remove {} error: {}", key, e);
                }
            }

            DbCommand::Flush { reply } => {
                let _ = reply.send(());
            }

            DbCommand::Shutdown => break,
        }
    }
    tracing::debug!("SQLite writer stopped");
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn put(&self, key: &str, value: &str) {
        match self.entries.lock() {
            Ok(mut m) => { m.insert(key.to_string(), value.to_string()); }
            Err(_)    => tracing::warn!("Memory store poisoned, dropping put {}", key),
        }
    }

    fn remove(&self, key: &str) {
        match self.entries.lock() {
            Ok(mut m) => { m.remove(key); }
            Err(_)    => tracing::warn!("Memory store poisoned, dropping remove {}", key),
        }
    }

    fn load_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let m = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(m.range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_prefix_scan() {
        let store = MemoryStore::new();
        store.put("kill_2", "b");
        store.put("kill_1", "a");
        store.put("stats", "{}");
        store.put("kilo", "x");
        store.remove("kill_2");

        let kills = store.load_prefix("kill_").expect("load");
        assert_eq!(kills, vec![("kill_1".to_string(), "a".to_string())]);
        assert_eq!(store.get("stats").as_deref(), Some("{}"));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn sqlite_writer_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = spawn_db_writer(&dir.path().join("data").join("tracker.db")).expect("open db");

        writer.put("kill_100", "first");
        writer.put("kill_200", "second");
        writer.put("kill_100", "replaced");
        writer.put("stats", "{}");
        writer.remove("kill_200");
        writer.flush().await.expect("flush");

        let kills = writer.load_prefix("kill_").expect("load");
        assert_eq!(kills, vec![("kill_100".to_string(), "replaced".to_string())]);
        assert_eq!(writer.load_prefix("stats").expect("load").len(), 1);

        writer.shutdown();
    }

    #[tokio::test]
    async fn reopened_database_keeps_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.db");

        let writer = spawn_db_writer(&path).expect("open db");
        writer.put("kill_1", "kept");
        writer.flush().await.expect("flush");
        writer.shutdown();

        let reopened = spawn_db_writer(&path).expect("reopen db");
        assert_eq!(reopened.load_prefix("kill_").expect("load").len(), 1);
        reopened.shutdown();
    }
}
