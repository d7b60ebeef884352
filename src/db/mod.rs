//! Transactional local storage for synced records.

pub mod schema;

use color_eyre::{eyre::eyre, Result};
use futures::future::select_all;
use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::sync::Transactional;

/// A `(collection, partition)` pair.
pub type Partition = (String, String);

/// The connection and the thread whose transaction is open on it.
struct Slot {
  conn: Connection,
  owner: Option<ThreadId>,
}

/// Record database with change notifications.
///
/// A transaction opened by [`run_in_transaction`](Transactional::run_in_transaction)
/// belongs to the calling thread. Until it ends, reads and writes from other
/// threads wait: they never see its uncommitted rows and never become part
/// of it. Writes made inside a transaction are announced to watchers only
/// after the commit.
pub struct Database {
  slot: Mutex<Slot>,
  released: Condvar,
  pending: Mutex<BTreeSet<Partition>>,
  channels: Mutex<HashMap<Partition, watch::Sender<u64>>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Database file inside a data directory.
  pub fn path_in(data_dir: &Path) -> PathBuf {
    data_dir.join("menza.db")
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(Self {
      slot: Mutex::new(Slot { conn, owner: None }),
      released: Condvar::new(),
      pending: Mutex::new(BTreeSet::new()),
      channels: Mutex::new(HashMap::new()),
    })
  }

  /// Lock the connection, waiting while another thread's transaction is open.
  fn access(&self) -> Result<MutexGuard<'_, Slot>> {
    let me = thread::current().id();
    let slot = self.slot.lock().map_err(|e| eyre!("Lock error: {}", e))?;
    self
      .released
      .wait_while(slot, |slot| slot.owner.is_some_and(|owner| owner != me))
      .map_err(|e| eyre!("Lock error: {}", e))
  }

  /// Replace the content of one partition with `records`, keeping their order.
  pub fn replace_partition<T: Serialize>(
    &self,
    collection: &str,
    partition: &str,
    records: &[T],
  ) -> Result<()> {
    let bodies = records
      .iter()
      .map(serde_json::to_string)
      .collect::<serde_json::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to serialize {} records: {}", collection, e))?;

    let slot = self.access()?;
    slot
      .conn
      .execute_batch("SAVEPOINT replace_partition")
      .map_err(|e| eyre!("Failed to open savepoint: {}", e))?;

    let written = Self::write_partition(&slot.conn, collection, partition, &bodies);
    let end = if written.is_ok() {
      "RELEASE replace_partition"
    } else {
      "ROLLBACK TO replace_partition; RELEASE replace_partition"
    };
    slot
      .conn
      .execute_batch(end)
      .map_err(|e| eyre!("Failed to close savepoint: {}", e))?;
    written?;

    debug!(collection, partition, records = bodies.len(), "Replaced partition");

    let key = (collection.to_string(), partition.to_string());
    if slot.owner.is_some() {
      self.pending_lock()?.insert(key);
    } else {
      drop(slot);
      self.notify([key]);
    }
    Ok(())
  }

  fn write_partition(
    conn: &Connection,
    collection: &str,
    partition: &str,
    bodies: &[String],
  ) -> Result<()> {
    conn
      .execute(
        "DELETE FROM documents WHERE collection = ?1 AND partition = ?2",
        params![collection, partition],
      )
      .map_err(|e| eyre!("Failed to clear {}/{}: {}", collection, partition, e))?;

    let mut stmt = conn
      .prepare_cached(
        "INSERT INTO documents (collection, partition, position, body) VALUES (?1, ?2, ?3, ?4)",
      )
      .map_err(|e| eyre!("Failed to prepare insert: {}", e))?;

    for (position, body) in bodies.iter().enumerate() {
      stmt
        .execute(params![collection, partition, position as i64, body])
        .map_err(|e| eyre!("Failed to insert into {}/{}: {}", collection, partition, e))?;
    }
    Ok(())
  }

  /// Records of one partition, in stored order. Unknown partitions are empty.
  pub fn load_partition<T: DeserializeOwned>(
    &self,
    collection: &str,
    partition: &str,
  ) -> Result<Vec<T>> {
    let slot = self.access()?;
    let mut stmt = slot
      .conn
      .prepare_cached(
        "SELECT body FROM documents WHERE collection = ?1 AND partition = ?2 ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let bodies = stmt
      .query_map(params![collection, partition], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query {}/{}: {}", collection, partition, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", collection, partition, e))?;

    bodies
      .iter()
      .map(|body| {
        serde_json::from_str(body)
          .map_err(|e| eyre!("Failed to deserialize {} record: {}", collection, e))
      })
      .collect()
  }

  /// Change counter of a partition, bumped after every committed write.
  pub fn watch(&self, collection: &str, partition: &str) -> watch::Receiver<u64> {
    let key = (collection.to_string(), partition.to_string());
    let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
    channels
      .entry(key)
      .or_insert_with(|| watch::channel(0).0)
      .subscribe()
  }

  /// Emits once right away and again after committed writes to any of
  /// `partitions`. Bursts of writes may be coalesced.
  pub fn changes(&self, partitions: &[(&str, &str)]) -> BoxStream<'static, ()> {
    let receivers: Vec<_> = partitions
      .iter()
      .map(|(collection, partition)| self.watch(collection, partition))
      .collect();

    stream::unfold((receivers, true), |(mut receivers, first)| async move {
      if !first {
        if receivers.is_empty() {
          return None;
        }
        let changed = receivers.iter_mut().map(|rx| Box::pin(rx.changed()));
        let (result, _, _) = select_all(changed).await;
        result.ok()?;
      }
      for rx in receivers.iter_mut() {
        let _ = rx.borrow_and_update();
      }
      Some(((), (receivers, false)))
    })
    .boxed()
  }

  fn pending_lock(&self) -> Result<MutexGuard<'_, BTreeSet<Partition>>> {
    self.pending.lock().map_err(|e| eyre!("Lock error: {}", e))
  }

  fn notify(&self, keys: impl IntoIterator<Item = Partition>) {
    let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
    for key in keys {
      if let Some(tx) = channels.get(&key) {
        tx.send_modify(|version| *version += 1);
      }
    }
  }

  /// Commit or roll back this thread's transaction and hand the connection
  /// back to waiting threads. Returns the partitions a commit made visible.
  fn end_transaction(&self, commit: bool) -> Result<Vec<Partition>> {
    let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
    let touched = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));

    let committed = if commit {
      slot
        .conn
        .execute_batch("COMMIT")
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    } else {
      Err(eyre!("Transaction rolled back"))
    };
    if committed.is_err() {
      if let Err(e) = slot.conn.execute_batch("ROLLBACK") {
        warn!(error = %e, "Failed to roll back transaction");
      }
    }

    slot.owner = None;
    drop(slot);
    self.released.notify_all();

    committed.map(|()| touched.into_iter().collect())
  }
}

/// Rolls back the current thread's transaction if its block unwinds.
struct OpenTransaction<'a>(Option<&'a Database>);

impl Drop for OpenTransaction<'_> {
  fn drop(&mut self) {
    if let Some(db) = self.0.take() {
      db.end_transaction(false).ok();
    }
  }
}

impl Transactional for Database {
  fn run_in_transaction(&self, block: &mut dyn FnMut() -> Result<()>) -> Result<()> {
    let me = thread::current().id();
    {
      let mut slot = self.access()?;
      if slot.owner == Some(me) {
        // Nested on this thread: part of the outer transaction
        drop(slot);
        return block();
      }
      slot
        .conn
        .execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      slot.owner = Some(me);
    }

    let mut open = OpenTransaction(Some(self));
    let result = block();
    open.0 = None;

    match result {
      Ok(()) => {
        let touched = self.end_transaction(true)?;
        self.notify(touched);
        Ok(())
      }
      Err(e) => {
        self.end_transaction(false).ok();
        Err(e)
      }
    }
  }
}
