#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use menza_sync::db::Database;
use menza_sync::hash::HashStore;
use menza_sync::kv::MemoryKvStore;
use menza_sync::menza::dto::{
  ApiContact, ApiDish, ApiOpeningHours, ApiSubsystem, ApiWeekDish,
};
use menza_sync::menza::{Language, Menza, MenzaApi, SubsystemId, SubsystemParams};
use menza_sync::sync::SyncError;
use menza_sync::validity::{ManualClock, ValidityChecker};

#[derive(Default)]
struct Upstream {
  subsystems: Vec<ApiSubsystem>,
  dishes: HashMap<u32, (String, Vec<ApiDish>)>,
  failing: HashMap<u32, SyncError>,
  no_week: HashSet<u32>,
}

/// Scripted in-memory upstream that records every call.
#[derive(Default)]
pub struct FakeApi {
  upstream: Mutex<Upstream>,
  calls: Mutex<Vec<String>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_subsystem(&self, id: u32, name: &str, opened: bool, week_menu: bool) {
    let mut upstream = self.upstream.lock().unwrap();
    upstream.subsystems.push(ApiSubsystem {
      id: Some(id),
      name: Some(name.to_string()),
      open: Some(opened),
      week_menu: Some(week_menu),
      ..Default::default()
    });
    if !week_menu {
      upstream.no_week.insert(id);
    }
  }

  /// Publish today's dishes of `id` under content hash `hash`.
  pub fn set_dishes(&self, id: u32, hash: &str, names: &[&str]) {
    let dishes = names
      .iter()
      .enumerate()
      .map(|(i, name)| ApiDish {
        id: Some(id as u64 * 100 + i as u64),
        category: Some("Main".to_string()),
        name: Some(name.to_string()),
        price_student: Some(40.0),
        ..Default::default()
      })
      .collect();
    self
      .upstream
      .lock()
      .unwrap()
      .dishes
      .insert(id, (hash.to_string(), dishes));
  }

  /// Make every call concerning `id` fail with `error`.
  pub fn fail(&self, id: u32, error: SyncError) {
    self.upstream.lock().unwrap().failing.insert(id, error);
  }

  pub fn recover(&self, id: u32) {
    self.upstream.lock().unwrap().failing.remove(&id);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, endpoint: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|call| call.starts_with(&format!("{}:", endpoint)))
      .count()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }

  fn record(&self, endpoint: &str, params: SubsystemParams) -> Result<(), SyncError> {
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{}:{}", endpoint, params.subsystem));
    match self.upstream.lock().unwrap().failing.get(&params.subsystem.0) {
      Some(error) => Err(error.clone()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl MenzaApi for FakeApi {
  async fn subsystems(&self, _language: Language) -> Result<Vec<ApiSubsystem>, SyncError> {
    self.calls.lock().unwrap().push("subsystems:".to_string());
    Ok(self.upstream.lock().unwrap().subsystems.clone())
  }

  async fn today_hash(&self, params: SubsystemParams) -> Result<String, SyncError> {
    self.record("today_hash", params)?;
    let upstream = self.upstream.lock().unwrap();
    Ok(
      upstream
        .dishes
        .get(&params.subsystem.0)
        .map(|(hash, _)| hash.clone())
        .unwrap_or_default(),
    )
  }

  async fn today_dishes(&self, params: SubsystemParams) -> Result<Vec<ApiDish>, SyncError> {
    self.record("today_dishes", params)?;
    let upstream = self.upstream.lock().unwrap();
    Ok(
      upstream
        .dishes
        .get(&params.subsystem.0)
        .map(|(_, dishes)| dishes.clone())
        .unwrap_or_default(),
    )
  }

  async fn week_dishes(&self, params: SubsystemParams) -> Result<Vec<ApiWeekDish>, SyncError> {
    self.record("week_dishes", params)?;
    if self.upstream.lock().unwrap().no_week.contains(&params.subsystem.0) {
      return Err(SyncError::WeekNotAvailable);
    }
    Ok(vec![ApiWeekDish {
      id: Some(1),
      date: Some("2026-03-11".to_string()),
      category: Some("Main".to_string()),
      name: Some("Svíčková".to_string()),
    }])
  }

  async fn contacts(&self, params: SubsystemParams) -> Result<Vec<ApiContact>, SyncError> {
    self.record("contacts", params)?;
    Ok(vec![ApiContact {
      id: Some(1),
      role: Some("Manager".to_string()),
      name: Some("Office".to_string()),
      email: Some("office@example.org".to_string()),
      ..Default::default()
    }])
  }

  async fn opening_hours(
    &self,
    params: SubsystemParams,
  ) -> Result<Vec<ApiOpeningHours>, SyncError> {
    self.record("opening_hours", params)?;
    Ok(vec![ApiOpeningHours {
      id: Some(1),
      title: Some("Lunch".to_string()),
      days_from: Some("Po".to_string()),
      days_to: Some("Pá".to_string()),
      time_from: Some("10:30".to_string()),
      time_to: Some("14:30".to_string()),
    }])
  }
}

/// A `Menza` over the fake upstream, in-memory storage and a manual clock
/// set to Tuesday 2026-03-10 10:00 UTC.
pub struct Harness {
  pub api: Arc<FakeApi>,
  pub clock: Arc<ManualClock>,
  pub checker: Arc<ValidityChecker>,
  pub hashes: Arc<HashStore>,
  pub db: Arc<Database>,
  pub menza: Menza,
}

impl Harness {
  pub fn new(api: FakeApi) -> Self {
    let api = Arc::new(api);
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap(),
    ));
    let kv = Arc::new(MemoryKvStore::new());
    let checker = Arc::new(ValidityChecker::new(kv.clone(), clock.clone()).unwrap());
    let hashes = Arc::new(HashStore::new(kv));
    let db = Arc::new(Database::open_in_memory().unwrap());
    let menza = Menza::new(api.clone(), db.clone(), checker.clone(), hashes.clone());

    Self {
      api,
      clock,
      checker,
      hashes,
      db,
      menza,
    }
  }
}

pub fn params(id: u32) -> SubsystemParams {
  SubsystemParams::new(SubsystemId(id), Language::Cs)
}
