//! Sync sources of the cafeteria datasets.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use super::api::MenzaApi;
use super::convert;
use super::dto::{ApiContact, ApiDish, ApiOpeningHours, ApiSubsystem, ApiWeekDish};
use super::types::{
  Contact, Dish, Language, OpeningHours, Subsystem, SubsystemInfo, SubsystemParams, WeekDish,
};
use crate::db::Database;
use crate::hash::{HashKey, HashStore};
use crate::sync::{
  Fetched, Job, SyncJob, SyncOutcome, SyncProcessor, SyncSource, Transactional,
};
use crate::validity::{Freshness, ValidityChecker, ValidityKey};

pub const SUBSYSTEMS: &str = "subsystems";
pub const TODAY_DISHES: &str = "today_dishes";
pub const WEEK_DISHES: &str = "week_dishes";
pub const CONTACTS: &str = "contacts";
pub const OPENING_HOURS: &str = "opening_hours";

/// Dependencies shared by every source.
#[derive(Clone)]
pub struct SyncContext {
  pub api: Arc<dyn MenzaApi>,
  pub db: Arc<Database>,
  pub checker: Arc<ValidityChecker>,
  pub hashes: Arc<HashStore>,
}

impl SyncContext {
  pub fn new(
    api: Arc<dyn MenzaApi>,
    db: Arc<Database>,
    checker: Arc<ValidityChecker>,
    hashes: Arc<HashStore>,
  ) -> Self {
    Self {
      api,
      db,
      checker,
      hashes,
    }
  }

  fn transactions(&self) -> Vec<Arc<dyn Transactional>> {
    vec![self.db.clone() as Arc<dyn Transactional>]
  }

  /// Stored records, or nothing if they cannot be read.
  fn load<T: DeserializeOwned>(&self, collection: &str, partition: &str) -> Vec<T> {
    self
      .db
      .load_partition(collection, partition)
      .unwrap_or_else(|e| {
        warn!(collection, partition, error = %e, "Failed to load records");
        Vec::new()
      })
  }

  /// Whether the cafeteria publishes a week menu. Unknown cafeterias are
  /// assumed to.
  fn supports_week(&self, params: &SubsystemParams) -> bool {
    self
      .load::<Subsystem>(SUBSYSTEMS, params.language.code())
      .iter()
      .find(|subsystem| subsystem.id == params.subsystem)
      .map(|subsystem| subsystem.supports_week)
      .unwrap_or(true)
  }
}

/// List of cafeterias, per language.
pub struct SubsystemSource {
  ctx: SyncContext,
  processor: SyncProcessor,
}

impl SubsystemSource {
  pub fn new(ctx: SyncContext) -> Self {
    Self {
      ctx,
      processor: SyncProcessor::new(),
    }
  }

  pub fn load(&self, language: Language) -> Vec<Subsystem> {
    self.ctx.load(SUBSYSTEMS, language.code())
  }

  fn jobs(&self) -> Vec<Arc<dyn SyncJob<Language>>> {
    let checker = self.ctx.checker.clone();
    let api = self.ctx.api.clone();
    let db = self.ctx.db.clone();

    vec![Job::new(
      "subsystems",
      move |language: &Language, forced| {
        let key = ValidityKey::agata_subsystems().with_language(*language);
        checker.gate(key, forced, Freshness::Today)
      },
      move |language: &Language| {
        let api = api.clone();
        let language = *language;
        async move { api.subsystems(language).await.map(Fetched::changed) }
      },
      |_: &Language, payload: Vec<ApiSubsystem>| convert::subsystems(payload),
      move |language: &Language, subsystems: &Vec<Subsystem>| {
        db.replace_partition(SUBSYSTEMS, language.code(), subsystems)
      },
    )
    .boxed()]
  }
}

#[async_trait]
impl SyncSource<Language> for SubsystemSource {
  type Data = Vec<Subsystem>;

  fn data(&self, language: &Language) -> BoxStream<'static, Vec<Subsystem>> {
    let ctx = self.ctx.clone();
    let language = *language;
    self
      .ctx
      .db
      .changes(&[(SUBSYSTEMS, language.code())])
      .map(move |()| ctx.load(SUBSYSTEMS, language.code()))
      .boxed()
  }

  async fn sync(&self, language: &Language, forced: bool) -> SyncOutcome {
    self
      .processor
      .run_sync(&self.jobs(), &self.ctx.transactions(), language, forced)
      .await
  }
}

/// Today's dishes of one cafeteria.
///
/// Besides the short validity window the payload is guarded by the upstream
/// content hash, so most refreshes only download the hash.
pub struct TodayDishSource {
  ctx: SyncContext,
  processor: SyncProcessor,
}

impl TodayDishSource {
  pub fn new(ctx: SyncContext) -> Self {
    Self {
      ctx,
      processor: SyncProcessor::new(),
    }
  }

  pub fn load(&self, params: &SubsystemParams) -> Vec<Dish> {
    self.ctx.load(TODAY_DISHES, &params.partition())
  }

  fn jobs(&self, forced: bool) -> Vec<Arc<dyn SyncJob<SubsystemParams>>> {
    let checker = self.ctx.checker.clone();
    let api = self.ctx.api.clone();
    let hashes = self.ctx.hashes.clone();
    let db = self.ctx.db.clone();

    vec![Job::new(
      "today dishes",
      move |params: &SubsystemParams, forced| {
        let key = ValidityKey::agata_today(params.subsystem).with_language(params.language);
        checker.gate(key, forced, Freshness::Recent)
      },
      move |params: &SubsystemParams| {
        let api = api.clone();
        let hashes = hashes.clone();
        let params = *params;
        async move {
          let key = HashKey::TodayDishes {
            subsystem: params.subsystem,
            language: params.language,
          };
          hashes
            .fetch_if_changed(key, forced, api.today_hash(params), || {
              api.today_dishes(params)
            })
            .await
        }
      },
      |params: &SubsystemParams, payload: Vec<ApiDish>| convert::dishes(params.subsystem, payload),
      move |params: &SubsystemParams, dishes: &Vec<Dish>| {
        db.replace_partition(TODAY_DISHES, &params.partition(), dishes)
      },
    )
    .boxed()]
  }
}

#[async_trait]
impl SyncSource<SubsystemParams> for TodayDishSource {
  type Data = Vec<Dish>;

  fn data(&self, params: &SubsystemParams) -> BoxStream<'static, Vec<Dish>> {
    let ctx = self.ctx.clone();
    let partition = params.partition();
    let changes = self.ctx.db.changes(&[(TODAY_DISHES, partition.as_str())]);
    changes
      .map(move |()| ctx.load(TODAY_DISHES, &partition))
      .boxed()
  }

  async fn sync(&self, params: &SubsystemParams, forced: bool) -> SyncOutcome {
    self
      .processor
      .run_sync(&self.jobs(forced), &self.ctx.transactions(), params, forced)
      .await
  }
}

/// Week menu of one cafeteria. Cafeterias without a week menu are always
/// skipped, even when forced.
pub struct WeekSource {
  ctx: SyncContext,
  processor: SyncProcessor,
}

impl WeekSource {
  pub fn new(ctx: SyncContext) -> Self {
    Self {
      ctx,
      processor: SyncProcessor::new(),
    }
  }

  pub fn load(&self, params: &SubsystemParams) -> Vec<WeekDish> {
    self.ctx.load(WEEK_DISHES, &params.partition())
  }

  fn jobs(&self) -> Vec<Arc<dyn SyncJob<SubsystemParams>>> {
    let ctx = self.ctx.clone();
    let api = self.ctx.api.clone();
    let db = self.ctx.db.clone();

    vec![Job::new(
      "week dishes",
      move |params: &SubsystemParams, forced| {
        if !ctx.supports_week(params) {
          debug!(subsystem = %params.subsystem, "No week menu offered");
          return None;
        }
        let key = ValidityKey::agata_week(params.subsystem).with_language(params.language);
        ctx.checker.gate(key, forced, Freshness::Today)
      },
      move |params: &SubsystemParams| {
        let api = api.clone();
        let params = *params;
        async move { api.week_dishes(params).await.map(Fetched::changed) }
      },
      |params: &SubsystemParams, payload: Vec<ApiWeekDish>| {
        convert::week_dishes(params.subsystem, payload)
      },
      move |params: &SubsystemParams, dishes: &Vec<WeekDish>| {
        db.replace_partition(WEEK_DISHES, &params.partition(), dishes)
      },
    )
    .boxed()]
  }
}

#[async_trait]
impl SyncSource<SubsystemParams> for WeekSource {
  type Data = Vec<WeekDish>;

  fn data(&self, params: &SubsystemParams) -> BoxStream<'static, Vec<WeekDish>> {
    let ctx = self.ctx.clone();
    let partition = params.partition();
    let changes = self.ctx.db.changes(&[(WEEK_DISHES, partition.as_str())]);
    changes
      .map(move |()| ctx.load(WEEK_DISHES, &partition))
      .boxed()
  }

  async fn sync(&self, params: &SubsystemParams, forced: bool) -> SyncOutcome {
    self
      .processor
      .run_sync(&self.jobs(), &self.ctx.transactions(), params, forced)
      .await
  }
}

/// Contacts and opening hours of one cafeteria. Both change rarely and are
/// refreshed once a week.
pub struct InfoSource {
  ctx: SyncContext,
  processor: SyncProcessor,
}

impl InfoSource {
  pub fn new(ctx: SyncContext) -> Self {
    Self {
      ctx,
      processor: SyncProcessor::new(),
    }
  }

  pub fn load(&self, params: &SubsystemParams) -> SubsystemInfo {
    load_info(&self.ctx, &params.partition())
  }

  fn jobs(&self) -> Vec<Arc<dyn SyncJob<SubsystemParams>>> {
    let contacts_checker = self.ctx.checker.clone();
    let contacts_api = self.ctx.api.clone();
    let contacts_db = self.ctx.db.clone();
    let hours_checker = self.ctx.checker.clone();
    let hours_api = self.ctx.api.clone();
    let hours_db = self.ctx.db.clone();

    let contacts = Job::new(
      "contacts",
      move |params: &SubsystemParams, forced| {
        let key = ValidityKey::agata_contacts(params.subsystem).with_language(params.language);
        contacts_checker.gate(key, forced, Freshness::ThisWeek)
      },
      move |params: &SubsystemParams| {
        let api = contacts_api.clone();
        let params = *params;
        async move { api.contacts(params).await.map(Fetched::changed) }
      },
      |params: &SubsystemParams, payload: Vec<ApiContact>| {
        convert::contacts(params.subsystem, payload)
      },
      move |params: &SubsystemParams, contacts: &Vec<Contact>| {
        contacts_db.replace_partition(CONTACTS, &params.partition(), contacts)
      },
    );

    let opening_hours = Job::new(
      "opening hours",
      move |params: &SubsystemParams, forced| {
        let key =
          ValidityKey::agata_opening_hours(params.subsystem).with_language(params.language);
        hours_checker.gate(key, forced, Freshness::ThisWeek)
      },
      move |params: &SubsystemParams| {
        let api = hours_api.clone();
        let params = *params;
        async move { api.opening_hours(params).await.map(Fetched::changed) }
      },
      |params: &SubsystemParams, payload: Vec<ApiOpeningHours>| {
        convert::all_opening_hours(params.subsystem, payload)
      },
      move |params: &SubsystemParams, hours: &Vec<OpeningHours>| {
        hours_db.replace_partition(OPENING_HOURS, &params.partition(), hours)
      },
    );

    vec![contacts.boxed(), opening_hours.boxed()]
  }
}

fn load_info(ctx: &SyncContext, partition: &str) -> SubsystemInfo {
  SubsystemInfo {
    contacts: ctx.load(CONTACTS, partition),
    opening_hours: ctx.load(OPENING_HOURS, partition),
  }
}

#[async_trait]
impl SyncSource<SubsystemParams> for InfoSource {
  type Data = SubsystemInfo;

  fn data(&self, params: &SubsystemParams) -> BoxStream<'static, SubsystemInfo> {
    let ctx = self.ctx.clone();
    let partition = params.partition();
    let changes = self
      .ctx
      .db
      .changes(&[(CONTACTS, partition.as_str()), (OPENING_HOURS, partition.as_str())]);
    changes
      .map(move |()| load_info(&ctx, &partition))
      .boxed()
  }

  async fn sync(&self, params: &SubsystemParams, forced: bool) -> SyncOutcome {
    self
      .processor
      .run_sync(&self.jobs(), &self.ctx.transactions(), params, forced)
      .await
  }
}
