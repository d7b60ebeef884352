use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use super::api::MenzaApi;
use super::sources::{InfoSource, SubsystemSource, SyncContext, TodayDishSource, WeekSource};
use super::types::{Language, SubsystemId, SubsystemParams};
use crate::db::Database;
use crate::hash::HashStore;
use crate::sync::{fan_out, FanOutOutcome, SyncResult, SyncSource};
use crate::validity::ValidityChecker;

/// Outcome of [`Menza::sync_all_important`].
#[derive(Debug, Clone)]
pub struct SyncReport {
  /// Result of refreshing the cafeteria list
  pub subsystems: SyncResult,
  /// Per-cafeteria results
  pub sources: FanOutOutcome<SubsystemParams>,
}

impl SyncReport {
  pub fn combined(&self) -> SyncResult {
    self
      .subsystems
      .clone()
      .merge(self.sources.combined.clone())
  }
}

/// All cafeteria datasets behind one handle.
pub struct Menza {
  subsystems: SubsystemSource,
  today: TodayDishSource,
  week: WeekSource,
  info: InfoSource,
}

impl Menza {
  pub fn new(
    api: Arc<dyn MenzaApi>,
    db: Arc<Database>,
    checker: Arc<ValidityChecker>,
    hashes: Arc<HashStore>,
  ) -> Self {
    let ctx = SyncContext::new(api, db, checker, hashes);
    Self {
      subsystems: SubsystemSource::new(ctx.clone()),
      today: TodayDishSource::new(ctx.clone()),
      week: WeekSource::new(ctx.clone()),
      info: InfoSource::new(ctx),
    }
  }

  pub fn subsystems(&self) -> &SubsystemSource {
    &self.subsystems
  }

  pub fn today(&self) -> &TodayDishSource {
    &self.today
  }

  pub fn week(&self) -> &WeekSource {
    &self.week
  }

  pub fn info(&self) -> &InfoSource {
    &self.info
  }

  /// Refresh the cafeteria list, then today's dishes and the info of every
  /// open cafeteria concurrently.
  ///
  /// `only` restricts the cafeterias; empty means all. A failing cafeteria
  /// never stops the others.
  pub async fn sync_all_important(
    &self,
    language: Language,
    only: &[SubsystemId],
    forced: bool,
  ) -> Result<SyncReport> {
    let subsystems = self.subsystems.sync(&language, forced).await?;

    let targets: Vec<SubsystemParams> = self
      .subsystems
      .load(language)
      .into_iter()
      .filter(|subsystem| subsystem.opened)
      .filter(|subsystem| only.is_empty() || only.contains(&subsystem.id))
      .map(|subsystem| SubsystemParams::new(subsystem.id, language))
      .collect();
    info!(
      language = %language,
      subsystems = targets.len(),
      forced,
      "Syncing cafeterias"
    );

    let sources = fan_out(targets, |params| async move {
      let (today, info) = tokio::join!(
        self.today.sync(&params, forced),
        self.info.sync(&params, forced)
      );
      Ok(today?.merge(info?))
    })
    .await;

    let report = SyncReport {
      subsystems,
      sources,
    };
    info!(result = %report.combined(), failures = report.sources.failures.len(), "Sync finished");
    Ok(report)
  }
}
