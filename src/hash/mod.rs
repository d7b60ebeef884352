//! Content-hash gate.
//!
//! The upstream API exposes a lightweight "current hash" for some resources.
//! Comparing it with the last hash we stored lets a job skip the expensive
//! payload fetch when nothing changed. A missing or unreadable cached hash
//! always means "changed".

use color_eyre::Result;
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::kv::KvStore;
use crate::menza::{Language, SubsystemId};
use crate::sync::{Fetched, SyncError};

/// KV namespace holding the hashes.
const NAMESPACE: &str = "hash";

/// Resources whose content hash is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
  /// Today's dish list of a subsystem
  TodayDishes {
    subsystem: SubsystemId,
    language: Language,
  },
}

impl HashKey {
  /// Stable, fixed-length storage key.
  pub fn storage_key(&self) -> String {
    let input = match self {
      Self::TodayDishes {
        subsystem,
        language,
      } => format!("today_dishes:{}:{}", subsystem, language.code()),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::TodayDishes {
        subsystem,
        language,
      } => format!("today's dishes of subsystem {} ({})", subsystem, language.code()),
    }
  }
}

/// Last seen upstream content hash per resource.
pub struct HashStore {
  kv: Arc<dyn KvStore>,
}

impl HashStore {
  pub fn new(kv: Arc<dyn KvStore>) -> Self {
    Self { kv }
  }

  /// Cached hash of `key`. Read failures count as "no hash".
  pub fn get_hash(&self, key: &HashKey) -> Option<String> {
    match self.kv.get(NAMESPACE, &key.storage_key()) {
      Ok(hash) => hash,
      Err(e) => {
        warn!(resource = %key.description(), error = %e, "Failed to read cached hash");
        None
      }
    }
  }

  pub fn set_hash(&self, key: &HashKey, hash: &str) -> Result<()> {
    self.kv.put(NAMESPACE, &key.storage_key(), hash)
  }

  /// Drop the cached hash so the next fetch downloads the full payload.
  pub fn invalidate(&self, key: &HashKey) -> Result<()> {
    self.kv.remove(NAMESPACE, &key.storage_key())
  }

  /// Fetch the full payload only if the upstream hash changed.
  ///
  /// `forced` ignores the cached hash. The new hash is not stored here; it
  /// travels with the payload as a [`PendingHash`] and is committed once the
  /// payload was stored successfully.
  pub async fn fetch_if_changed<T, H, F, Fut>(
    self: &Arc<Self>,
    key: HashKey,
    forced: bool,
    remote_hash: H,
    fetch_full: F,
  ) -> Result<Fetched<T>, SyncError>
  where
    H: Future<Output = Result<String, SyncError>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
  {
    let remote = remote_hash.await?;

    if !forced && self.get_hash(&key).as_deref() == Some(remote.as_str()) {
      debug!(resource = %key.description(), "Content hash unchanged");
      return Ok(Fetched::Unchanged);
    }

    let payload = fetch_full().await?;
    Ok(Fetched::Changed {
      payload,
      hash: Some(PendingHash {
        store: Arc::clone(self),
        key,
        hash: remote,
      }),
    })
  }
}

/// A hash waiting for its payload to be stored.
pub struct PendingHash {
  store: Arc<HashStore>,
  key: HashKey,
  hash: String,
}

impl PendingHash {
  /// Remember the hash. Failures are logged; the next sync then simply
  /// fetches the full payload again.
  pub fn commit(self) {
    if let Err(e) = self.store.set_hash(&self.key, &self.hash) {
      warn!(resource = %self.key.description(), error = %e, "Failed to store content hash");
    }
  }
}

impl fmt::Debug for PendingHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingHash")
      .field("key", &self.key)
      .field("hash", &self.hash)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kv::MemoryKvStore;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Store whose reads always fail.
  struct BrokenKv;

  impl KvStore for BrokenKv {
    fn get(&self, _namespace: &str, _key: &str) -> Result<Option<String>> {
      Err(eyre!("disk on fire"))
    }
    fn put(&self, _namespace: &str, _key: &str, _value: &str) -> Result<()> {
      Ok(())
    }
    fn remove(&self, _namespace: &str, _key: &str) -> Result<()> {
      Ok(())
    }
    fn entries(&self, _namespace: &str) -> Result<Vec<(String, String)>> {
      Ok(Vec::new())
    }
  }

  fn key() -> HashKey {
    HashKey::TodayDishes {
      subsystem: SubsystemId(1),
      language: Language::Cs,
    }
  }

  #[test]
  fn test_roundtrip() {
    let store = HashStore::new(Arc::new(MemoryKvStore::new()));
    assert_eq!(store.get_hash(&key()), None);

    store.set_hash(&key(), "abc").unwrap();
    assert_eq!(store.get_hash(&key()).as_deref(), Some("abc"));

    store.invalidate(&key()).unwrap();
    assert_eq!(store.get_hash(&key()), None);
  }

  #[test]
  fn test_storage_key_is_stable() {
    let a = key().storage_key();
    assert_eq!(a, key().storage_key());
    assert_eq!(a.len(), 64);
    let other = HashKey::TodayDishes {
      subsystem: SubsystemId(1),
      language: Language::En,
    };
    assert_ne!(a, other.storage_key());
  }

  #[test]
  fn test_read_failure_is_no_hash() {
    let store = HashStore::new(Arc::new(BrokenKv));
    assert_eq!(store.get_hash(&key()), None);
  }

  #[tokio::test]
  async fn test_unchanged_hash_skips_full_fetch() {
    let store = Arc::new(HashStore::new(Arc::new(MemoryKvStore::new())));
    store.set_hash(&key(), "abc").unwrap();
    let full_fetches = AtomicUsize::new(0);

    let fetched = store
      .fetch_if_changed(key(), false, async { Ok("abc".to_string()) }, || async {
        full_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1, 2, 3])
      })
      .await
      .unwrap();

    assert!(matches!(fetched, Fetched::Unchanged));
    assert_eq!(full_fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_missing_hash_fetches_and_commits_later() {
    let store = Arc::new(HashStore::new(Arc::new(MemoryKvStore::new())));

    let fetched = store
      .fetch_if_changed(key(), false, async { Ok("def".to_string()) }, || async {
        Ok(vec![1, 2, 3])
      })
      .await
      .unwrap();

    let Fetched::Changed { payload, hash } = fetched else {
      panic!("expected changed content");
    };
    assert_eq!(payload, vec![1, 2, 3]);
    // Not stored until committed
    assert_eq!(store.get_hash(&key()), None);

    hash.unwrap().commit();
    assert_eq!(store.get_hash(&key()).as_deref(), Some("def"));
  }

  #[tokio::test]
  async fn test_forced_ignores_cached_hash() {
    let store = Arc::new(HashStore::new(Arc::new(MemoryKvStore::new())));
    store.set_hash(&key(), "abc").unwrap();

    let fetched = store
      .fetch_if_changed(key(), true, async { Ok("abc".to_string()) }, || async {
        Ok("payload")
      })
      .await
      .unwrap();
    assert!(matches!(fetched, Fetched::Changed { .. }));
  }

  #[tokio::test]
  async fn test_remote_hash_error_propagates() {
    let store = Arc::new(HashStore::new(Arc::new(MemoryKvStore::new())));

    let result = store
      .fetch_if_changed(key(), false, async { Err(SyncError::Timeout) }, || async {
        Ok("payload")
      })
      .await;
    assert!(matches!(result, Err(SyncError::Timeout)));
  }
}
