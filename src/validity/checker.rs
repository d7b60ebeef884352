//! Time-boxed freshness bookkeeping.

use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::clock::Clock;
use super::key::ValidityKey;
use crate::kv::KvStore;
use crate::sync::{Gate, SyncOutcome, SyncResult};

/// KV namespace holding the timestamps.
const NAMESPACE: &str = "validity";

/// Window used by [`Freshness::Recent`] unless configured otherwise.
pub const DEFAULT_RECENT_WINDOW: Duration = Duration::seconds(60);

/// Zone in which day and week boundaries are computed unless configured
/// otherwise.
pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::Europe::Prague;

/// A freshness predicate over a key's last update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Updated within the checker's recent window
  Recent,
  /// Updated on the current calendar day
  Today,
  /// Updated in the current ISO week
  ThisWeek,
  /// Updated less than the given duration ago
  Within(Duration),
  /// Updated at or after the given instant
  Since(DateTime<Utc>),
}

impl Freshness {
  fn holds(
    &self,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    zone: &Tz,
    recent_window: Duration,
  ) -> bool {
    let Some(last) = last else {
      return false;
    };

    match self {
      Freshness::Recent => now - last < recent_window,
      Freshness::Today => {
        last.with_timezone(zone).date_naive() == now.with_timezone(zone).date_naive()
      }
      Freshness::ThisWeek => {
        last.with_timezone(zone).iso_week() == now.with_timezone(zone).iso_week()
      }
      Freshness::Within(window) => now - last < *window,
      Freshness::Since(instant) => last >= *instant,
    }
  }
}

/// Process-wide record of when each dataset was last synced successfully.
///
/// Timestamps are loaded from the [`KvStore`] once at construction and
/// written through on every change. Writers are serialized with their
/// persistence write; freshness reads only wait for the in-memory map.
pub struct ValidityChecker {
  kv: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  zone: Tz,
  recent_window: Duration,
  entries: Mutex<HashMap<ValidityKey, watch::Sender<Option<DateTime<Utc>>>>>,
  writes: Mutex<()>,
}

impl ValidityChecker {
  /// Create a checker and load the persisted timestamps.
  pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Result<Self> {
    let mut entries = HashMap::new();

    for (raw_key, raw_value) in kv.entries(NAMESPACE)? {
      match DateTime::parse_from_rfc3339(&raw_value) {
        Ok(at) => {
          let (tx, _) = watch::channel(Some(at.with_timezone(&Utc)));
          entries.insert(ValidityKey::from_persisted(raw_key), tx);
        }
        Err(e) => warn!(key = %raw_key, error = %e, "Ignoring unreadable validity timestamp"),
      }
    }

    debug!(count = entries.len(), "Loaded validity timestamps");

    Ok(Self {
      kv,
      clock,
      zone: DEFAULT_TIME_ZONE,
      recent_window: DEFAULT_RECENT_WINDOW,
      entries: Mutex::new(entries),
      writes: Mutex::new(()),
    })
  }

  /// Set the zone used for day and week boundaries.
  pub fn with_time_zone(mut self, zone: Tz) -> Self {
    self.zone = zone;
    self
  }

  /// Set the window considered "recent".
  pub fn with_recent_window(mut self, window: Duration) -> Self {
    self.recent_window = window;
    self
  }

  pub fn time_zone(&self) -> Tz {
    self.zone
  }

  /// Last successful update of `key`, if any.
  pub fn last_update(&self, key: &ValidityKey) -> Option<DateTime<Utc>> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.get(key).and_then(|tx| *tx.borrow())
  }

  /// Evaluate a freshness predicate now.
  pub fn is_fresh(&self, key: &ValidityKey, freshness: Freshness) -> bool {
    freshness.holds(
      self.last_update(key),
      self.clock.now(),
      &self.zone,
      self.recent_window,
    )
  }

  pub fn is_recent(&self, key: &ValidityKey) -> bool {
    self.is_fresh(key, Freshness::Recent)
  }

  pub fn is_from_today(&self, key: &ValidityKey) -> bool {
    self.is_fresh(key, Freshness::Today)
  }

  pub fn is_this_week(&self, key: &ValidityKey) -> bool {
    self.is_fresh(key, Freshness::ThisWeek)
  }

  pub fn is_updated_within(&self, key: &ValidityKey, window: Duration) -> bool {
    self.is_fresh(key, Freshness::Within(window))
  }

  pub fn is_updated_since(&self, key: &ValidityKey, instant: DateTime<Utc>) -> bool {
    self.is_fresh(key, Freshness::Since(instant))
  }

  /// Record that `key` was synced successfully just now.
  ///
  /// The stored timestamp never moves backwards, even if the clock does.
  pub fn on_data_updated(&self, key: &ValidityKey) -> Result<()> {
    let _writing = self.writes.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let now = self.clock.now();
    let next = match self.last_update(key) {
      Some(previous) if previous > now => previous,
      _ => now,
    };

    self.kv.put(NAMESPACE, key.as_str(), &next.to_rfc3339())?;
    self.publish(key, Some(next));
    debug!(key = %key, at = %next, "Marked data as updated");

    Ok(())
  }

  /// Forget the timestamp of `key` so the next freshness check fails.
  pub fn invalidate_key(&self, key: &ValidityKey) -> Result<()> {
    let _writing = self.writes.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    self.kv.remove(NAMESPACE, key.as_str())?;
    self.publish(key, None);
    debug!(key = %key, "Invalidated validity key");

    Ok(())
  }

  fn publish(&self, key: &ValidityKey, at: Option<DateTime<Utc>>) {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    match entries.get(key) {
      Some(tx) => {
        tx.send_replace(at);
      }
      None if at.is_some() => {
        entries.insert(key.clone(), watch::channel(at).0);
      }
      None => {}
    }
  }

  /// Forget every timestamp, e.g. after the user switched accounts.
  pub fn invalidate_all(&self) -> Result<()> {
    let keys: Vec<ValidityKey> = {
      let entries = self
        .entries
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      entries.keys().cloned().collect()
    };

    for key in &keys {
      self.invalidate_key(key)?;
    }
    Ok(())
  }

  /// Receiver that sees every timestamp change of `key`.
  pub fn subscribe(&self, key: &ValidityKey) -> watch::Receiver<Option<DateTime<Utc>>> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries
      .entry(key.clone())
      .or_insert_with(|| watch::channel(None).0)
      .subscribe()
  }

  /// Live form of [`is_fresh`](Self::is_fresh).
  ///
  /// Emits the current answer immediately and again after every update or
  /// invalidation of `key`.
  pub fn observe(
    &self,
    key: &ValidityKey,
    freshness: Freshness,
  ) -> impl Stream<Item = bool> + Send + 'static {
    let rx = self.subscribe(key);
    let clock = Arc::clone(&self.clock);
    let zone = self.zone;
    let recent_window = self.recent_window;

    stream::unfold((rx, true), move |(mut rx, first)| {
      let clock = Arc::clone(&clock);
      async move {
        if !first && rx.changed().await.is_err() {
          return None;
        }
        let last = *rx.borrow_and_update();
        let fresh = freshness.holds(last, clock.now(), &zone, recent_window);
        Some((fresh, (rx, false)))
      }
    })
  }

  /// Whether `key` was updated at or after an externally published instant,
  /// re-evaluated whenever either side changes.
  ///
  /// While no instant is published, any recorded update counts as fresh.
  pub fn observe_since(
    &self,
    key: &ValidityKey,
    published: watch::Receiver<Option<DateTime<Utc>>>,
  ) -> impl Stream<Item = bool> + Send + 'static {
    let rx = self.subscribe(key);

    stream::unfold(
      (rx, published, true),
      |(mut rx, mut published, first)| async move {
        if !first {
          tokio::select! {
            changed = rx.changed() => changed.ok()?,
            changed = published.changed() => changed.ok()?,
          }
        }
        let last = *rx.borrow_and_update();
        let since = *published.borrow_and_update();
        let fresh = match (last, since) {
          (Some(last), Some(since)) => last >= since,
          (Some(_), None) => true,
          (None, _) => false,
        };
        Some((fresh, (rx, published, false)))
      },
    )
  }

  /// Skip gate used by sync jobs.
  ///
  /// Returns `None` when the job can be skipped: not forced and `freshness`
  /// holds. Otherwise returns a gate that marks `key` fresh once closed with
  /// a successful result.
  pub fn gate(
    self: &Arc<Self>,
    key: ValidityKey,
    forced: bool,
    freshness: Freshness,
  ) -> Option<Gate> {
    self.gate_with(key, forced, |checker, key| checker.is_fresh(key, freshness))
  }

  /// Like [`gate`](Self::gate) with a custom skip predicate. The predicate
  /// is not evaluated for forced runs.
  pub fn gate_with<F>(self: &Arc<Self>, key: ValidityKey, forced: bool, can_skip: F) -> Option<Gate>
  where
    F: FnOnce(&ValidityChecker, &ValidityKey) -> bool,
  {
    if !forced && can_skip(&**self, &key) {
      debug!(key = %key, "Data still valid, skipping");
      return None;
    }
    Some(Gate::tracking(Arc::clone(self), key))
  }

  /// Run `block` behind the skip gate.
  ///
  /// The key is marked fresh only when `block` returns a successful result;
  /// problems and fatal errors leave the timestamp untouched.
  pub async fn with_check<B, Fut>(
    self: &Arc<Self>,
    key: ValidityKey,
    forced: bool,
    freshness: Freshness,
    block: B,
  ) -> SyncOutcome
  where
    B: FnOnce() -> Fut,
    Fut: Future<Output = SyncOutcome>,
  {
    let Some(gate) = self.gate(key, forced, freshness) else {
      return Ok(SyncResult::Skipped);
    };

    let result = block().await?;
    gate.close(&result);
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kv::MemoryKvStore;
  use crate::menza::SubsystemId;
  use crate::validity::ManualClock;
  use crate::sync::SyncError;
  use chrono::TimeZone;
  use futures::StreamExt;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::mpsc;

  fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
  }

  fn checker_at(
    now: DateTime<Utc>,
  ) -> (Arc<ValidityChecker>, Arc<ManualClock>, Arc<MemoryKvStore>) {
    let kv = Arc::new(MemoryKvStore::new());
    let clock = Arc::new(ManualClock::new(now));
    let checker = ValidityChecker::new(kv.clone(), clock.clone()).unwrap();
    (Arc::new(checker), clock, kv)
  }

  fn key() -> ValidityKey {
    ValidityKey::agata_today(SubsystemId(3))
  }

  #[test]
  fn test_recent_after_update_and_not_after_invalidate() {
    let (checker, clock, _) = checker_at(at(2026, 3, 10, 12, 0));
    assert!(!checker.is_recent(&key()));

    checker.on_data_updated(&key()).unwrap();
    assert!(checker.is_recent(&key()));

    clock.advance(Duration::seconds(61));
    assert!(!checker.is_recent(&key()));
    assert!(checker.is_updated_within(&key(), Duration::minutes(5)));

    checker.invalidate_key(&key()).unwrap();
    assert!(!checker.is_updated_within(&key(), Duration::minutes(5)));
    assert!(checker.last_update(&key()).is_none());
  }

  #[test]
  fn test_today_uses_canonical_zone() {
    // 23:30 UTC on March 10th is already March 11th in Prague (UTC+1)
    let (checker, clock, _) = checker_at(at(2026, 3, 10, 23, 30));
    checker.on_data_updated(&key()).unwrap();

    clock.set(at(2026, 3, 11, 8, 0));
    assert!(checker.is_from_today(&key()));

    clock.set(at(2026, 3, 11, 23, 30));
    assert!(!checker.is_from_today(&key()));
  }

  #[test]
  fn test_this_week_boundary() {
    // Sunday 2026-03-15 12:00 UTC
    let (checker, clock, _) = checker_at(at(2026, 3, 15, 12, 0));
    checker.on_data_updated(&key()).unwrap();
    assert!(checker.is_this_week(&key()));

    // Monday 2026-03-16 00:30 Prague time is 23:30 UTC on Sunday
    clock.set(at(2026, 3, 15, 23, 30));
    assert!(!checker.is_this_week(&key()));
  }

  #[test]
  fn test_timestamp_never_moves_backwards() {
    let (checker, clock, _) = checker_at(at(2026, 3, 10, 12, 0));
    checker.on_data_updated(&key()).unwrap();

    clock.set(at(2026, 3, 10, 11, 0));
    checker.on_data_updated(&key()).unwrap();
    assert_eq!(checker.last_update(&key()), Some(at(2026, 3, 10, 12, 0)));
  }

  #[test]
  fn test_timestamps_are_persisted() {
    let (checker, clock, kv) = checker_at(at(2026, 3, 10, 12, 0));
    checker.on_data_updated(&key()).unwrap();

    let reloaded = ValidityChecker::new(kv, clock).unwrap();
    assert_eq!(reloaded.last_update(&key()), Some(at(2026, 3, 10, 12, 0)));
    assert!(reloaded.is_recent(&key()));
  }

  #[test]
  fn test_updated_since_instant() {
    let (checker, _, _) = checker_at(at(2026, 3, 10, 12, 0));
    checker.on_data_updated(&key()).unwrap();
    assert!(checker.is_updated_since(&key(), at(2026, 3, 10, 0, 0)));
    assert!(!checker.is_updated_since(&key(), at(2026, 3, 10, 12, 1)));
  }

  #[test]
  fn test_gate_skips_only_when_not_forced() {
    let (checker, _, _) = checker_at(at(2026, 3, 10, 12, 0));
    checker.on_data_updated(&key()).unwrap();

    assert!(checker.gate(key(), false, Freshness::Today).is_none());
    assert!(checker.gate(key(), true, Freshness::Today).is_some());
  }

  #[tokio::test]
  async fn test_with_check_marks_fresh_only_on_success() {
    let (checker, _, _) = checker_at(at(2026, 3, 10, 12, 0));

    let result = checker
      .with_check(key(), false, Freshness::Today, || async {
        Ok(SyncResult::problem(SyncError::Timeout))
      })
      .await
      .unwrap();
    assert!(result.is_problem());
    assert!(checker.last_update(&key()).is_none());

    let result = checker
      .with_check(key(), false, Freshness::Today, || async { Ok(SyncResult::Updated) })
      .await
      .unwrap();
    assert_eq!(result, SyncResult::Updated);
    assert!(checker.is_from_today(&key()));

    let ran = AtomicBool::new(false);
    let result = checker
      .with_check(key(), false, Freshness::Today, || async {
        ran.store(true, Ordering::SeqCst);
        Ok(SyncResult::Updated)
      })
      .await
      .unwrap();
    assert_eq!(result, SyncResult::Skipped);
    assert!(!ran.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_observe_emits_on_changes() {
    let (checker, _, _) = checker_at(at(2026, 3, 10, 12, 0));
    let mut fresh = Box::pin(checker.observe(&key(), Freshness::Today));

    assert_eq!(fresh.next().await, Some(false));
    checker.on_data_updated(&key()).unwrap();
    assert_eq!(fresh.next().await, Some(true));
    checker.invalidate_key(&key()).unwrap();
    assert_eq!(fresh.next().await, Some(false));
  }

  #[tokio::test]
  async fn test_observe_since_follows_published_instant() {
    let (checker, _, _) = checker_at(at(2026, 3, 10, 12, 0));
    let (published_tx, published_rx) = watch::channel(None);
    let mut fresh = Box::pin(checker.observe_since(&key(), published_rx));

    assert_eq!(fresh.next().await, Some(false));
    checker.on_data_updated(&key()).unwrap();
    assert_eq!(fresh.next().await, Some(true));

    published_tx.send_replace(Some(at(2026, 3, 10, 13, 0)));
    assert_eq!(fresh.next().await, Some(false));
  }

  /// Store whose first write blocks until released.
  struct SlowKv {
    inner: MemoryKvStore,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
  }

  impl KvStore for SlowKv {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
      self.inner.get(namespace, key)
    }
    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
      if let Some(entered) = self.entered.lock().unwrap().take() {
        entered.send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
      }
      self.inner.put(namespace, key, value)
    }
    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
      self.inner.remove(namespace, key)
    }
    fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>> {
      self.inner.entries(namespace)
    }
  }

  #[test]
  fn test_reads_do_not_wait_for_persistence() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let kv = Arc::new(SlowKv {
      inner: MemoryKvStore::new(),
      entered: Mutex::new(Some(entered_tx)),
      release: Mutex::new(release_rx),
    });
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));
    let checker = Arc::new(ValidityChecker::new(kv, clock).unwrap());

    let writer = {
      let checker = Arc::clone(&checker);
      std::thread::spawn(move || checker.on_data_updated(&key()))
    };

    entered_rx.recv().unwrap();
    // The write is stuck on disk; reads still answer from memory
    assert!(!checker.is_recent(&key()));
    assert!(!checker.is_recent(&ValidityKey::agata_today(SubsystemId(4))));

    release_tx.send(()).unwrap();
    writer.join().unwrap().unwrap();
    assert!(checker.is_recent(&key()));
  }
}
