use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::collections::durable::Collection;
use crate::error::Result;

/// Owns the single SQLite connection backing every durable collection in the
/// store, plus the autosave loop. Callers never touch `rusqlite` directly,
/// only `Collection` handles obtained here.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    closed: AtomicBool,
}

impl Database {
    /// Open (creating if absent) the backing file at `path`. `:memory:` is
    /// accepted for tests. Absence of a backing file on first open is not
    /// an error.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .or_else(|_| conn.execute_batch("PRAGMA foreign_keys=ON;"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            // A closed store must observably fail subsequent operations.
            return Err(rusqlite::Error::InvalidQuery.into());
        }
        Ok(())
    }

    /// `getCollection`: `Some` iff a SQLite table by that name already
    /// exists.
    pub fn get_collection(&self, name: &str, key_columns: &[&str]) -> Result<Option<Collection>> {
        self.ensure_open()?;
        let exists: bool = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                [name],
                |_| Ok(true),
            )
            .unwrap_or(false)
        };
        Ok(exists.then(|| Collection::new(self.conn.clone(), name, key_columns)))
    }

    /// `addCollection(name, {indices, unique})`: create the backing table if
    /// absent (idempotent), composite-primary-keyed on `key_columns`.
    pub fn add_collection(&self, name: &str, key_columns: &[&str]) -> Result<Collection> {
        self.ensure_open()?;
        let cols_ddl: Vec<String> = key_columns
            .iter()
            .map(|c| format!("\"{}\" TEXT NOT NULL", c.replace('"', "\"\"")))
            .collect();
        let pk = key_columns
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({}, doc TEXT NOT NULL, PRIMARY KEY({}))",
            name.replace('"', "\"\""),
            cols_ddl.join(", "),
            pk
        );
        let conn = self.conn.lock().unwrap();
        conn.execute(&sql, [])?;
        drop(conn);
        Ok(Collection::new(self.conn.clone(), name, key_columns))
    }

    /// `removeCollection(name)`: drop the backing table if present. Not an
    /// error if it never existed — callers that need "stale leftover"
    /// semantics call this unconditionally before recreating.
    pub fn remove_collection(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", name.replace('"', "\"\"")), [])?;
        Ok(())
    }

    /// `saveDatabase`: force a WAL checkpoint so durability doesn't depend
    /// on the autosave timer firing.
    pub fn snapshot(&self) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);").ok();
        Ok(())
    }

    /// Flush and mark closed; subsequent operations observably fail.
    pub fn close(&self) -> Result<()> {
        self.snapshot()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Spawn the background autosave loop: snapshot every `interval`,
    /// stopping cleanly once the store is closed. A `tokio::time::interval`
    /// tick drives a fallible async step whose errors are logged, never
    /// panicked.
    pub fn spawn_autosave(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let db = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if db.is_closed() {
                    break;
                }
                if let Err(e) = db.snapshot() {
                    tracing::error!("autosave snapshot failed: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_and_bootstrap_collection() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.get_collection("widgets", &["id"]).unwrap().is_none());
        db.add_collection("widgets", &["id"]).unwrap();
        assert!(db.get_collection("widgets", &["id"]).unwrap().is_some());
    }

    #[test]
    fn close_marks_subsequent_operations_failing() {
        let db = Database::open(":memory:").unwrap();
        db.add_collection("widgets", &["id"]).unwrap();
        db.close().unwrap();
        assert!(db.add_collection("other", &["id"]).is_err());
    }

    #[test]
    fn remove_collection_then_recreate() {
        let db = Database::open(":memory:").unwrap();
        let col = db.add_collection("widgets", &["id"]).unwrap();
        col.insert(&["1"], &serde_json::json!({"a": 1})).unwrap();
        db.remove_collection("widgets").unwrap();
        assert!(db.get_collection("widgets", &["id"]).unwrap().is_none());
        let col2 = db.add_collection("widgets", &["id"]).unwrap();
        assert!(col2.find_one(&["1"]).unwrap().is_none());
    }
}
