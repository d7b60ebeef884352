//! Validity and hash records survive a restart.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use menza_sync::hash::{HashKey, HashStore};
use menza_sync::kv::SqliteKvStore;
use menza_sync::menza::{Language, SubsystemId};
use menza_sync::validity::{ManualClock, ValidityChecker, ValidityKey};

fn clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::new(
    Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap(),
  ))
}

#[test]
fn test_validity_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("state.db");
  let fresh = ValidityKey::agata_contacts(SubsystemId(1));
  let dropped = ValidityKey::agata_contacts(SubsystemId(2));

  {
    let kv = Arc::new(SqliteKvStore::open(&path).unwrap());
    let checker = ValidityChecker::new(kv, clock()).unwrap();
    checker.on_data_updated(&fresh).unwrap();
    checker.on_data_updated(&dropped).unwrap();
    checker.invalidate_key(&dropped).unwrap();
  }

  let kv = Arc::new(SqliteKvStore::open(&path).unwrap());
  let checker = ValidityChecker::new(kv, clock()).unwrap();
  assert!(checker.is_this_week(&fresh));
  assert_eq!(checker.last_update(&dropped), None);
}

#[test]
fn test_hash_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("state.db");
  let key = HashKey::TodayDishes {
    subsystem: SubsystemId(4),
    language: Language::En,
  };

  HashStore::new(Arc::new(SqliteKvStore::open(&path).unwrap()))
    .set_hash(&key, "cafe")
    .unwrap();

  let store = HashStore::new(Arc::new(SqliteKvStore::open(&path).unwrap()));
  assert_eq!(store.get_hash(&key).as_deref(), Some("cafe"));
}
