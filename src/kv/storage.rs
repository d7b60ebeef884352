//! Key/value storage trait with in-memory and SQLite implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// Durable string key/value storage, partitioned by namespace.
///
/// Every single call is atomic with respect to other calls.
pub trait KvStore: Send + Sync {
  /// Read one value.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

  /// Insert or overwrite one value.
  fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

  /// Delete one value. Deleting a missing key is not an error.
  fn remove(&self, namespace: &str, key: &str) -> Result<()>;

  /// All entries of a namespace, ordered by key.
  fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>>;
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
  data: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryKvStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
    let data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
  }

  fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
    let mut data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    data
      .entry(namespace.to_string())
      .or_default()
      .insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<()> {
    let mut data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if let Some(ns) = data.get_mut(namespace) {
      ns.remove(key);
    }
    Ok(())
  }

  fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>> {
    let data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      data
        .get(namespace)
        .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default(),
    )
  }
}

/// SQLite-backed settings storage.
pub struct SqliteKvStore {
  conn: Mutex<Connection>,
}

/// Schema for the settings table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, key)
);
"#;

impl SqliteKvStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create settings directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open settings database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  /// Store that is discarded when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory settings database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run settings migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl KvStore for SqliteKvStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE namespace = ? AND key = ?",
        params![namespace, key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", namespace, key, e))
  }

  fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (namespace, key, value, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![namespace, key, value],
      )
      .map_err(|e| eyre!("Failed to write {}/{}: {}", namespace, key, e))?;

    Ok(())
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM kv_store WHERE namespace = ? AND key = ?",
        params![namespace, key],
      )
      .map_err(|e| eyre!("Failed to delete {}/{}: {}", namespace, key, e))?;

    Ok(())
  }

  fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key, value FROM kv_store WHERE namespace = ? ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query {}: {}", namespace, e))?
      .collect::<rusqlite::Result<Vec<(String, String)>>>()
      .map_err(|e| eyre!("Failed to read {}: {}", namespace, e))?;

    Ok(rows)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn exercise(store: &dyn KvStore) {
    assert_eq!(store.get("hash", "a").unwrap(), None);

    store.put("hash", "a", "abc").unwrap();
    store.put("hash", "b", "def").unwrap();
    store.put("validity", "a", "2026-01-01T00:00:00Z").unwrap();
    assert_eq!(store.get("hash", "a").unwrap().as_deref(), Some("abc"));

    store.put("hash", "a", "xyz").unwrap();
    assert_eq!(store.get("hash", "a").unwrap().as_deref(), Some("xyz"));

    let entries = store.entries("hash").unwrap();
    assert_eq!(
      entries,
      vec![
        ("a".to_string(), "xyz".to_string()),
        ("b".to_string(), "def".to_string())
      ]
    );

    store.remove("hash", "a").unwrap();
    store.remove("hash", "missing").unwrap();
    assert_eq!(store.get("hash", "a").unwrap(), None);
    assert_eq!(store.entries("validity").unwrap().len(), 1);
  }

  #[test]
  fn test_memory_store() {
    exercise(&MemoryKvStore::new());
  }

  #[test]
  fn test_sqlite_store() {
    exercise(&SqliteKvStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_store_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("settings.db");

    {
      let store = SqliteKvStore::open(&path).unwrap();
      store.put("hash", "dishes_1", "abc").unwrap();
    }

    let store = SqliteKvStore::open(&path).unwrap();
    assert_eq!(store.get("hash", "dishes_1").unwrap().as_deref(), Some("abc"));
  }
}
