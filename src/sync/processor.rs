//! Runs sync jobs and merges their results.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::job::{Prepared, StoreCall, SyncJob};
use super::result::{ErrorList, SyncOutcome, SyncResult};

/// A storage backend that can run a block atomically.
pub trait Transactional: Send + Sync {
  /// Run `block` inside one transaction. Commits when it returns `Ok`,
  /// rolls back otherwise.
  fn run_in_transaction(&self, block: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Executes jobs for one set of parameters.
///
/// Jobs run concurrently. A failing fetch or conversion only affects its own
/// job; the only fatal failure is a store that could not be committed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncProcessor;

impl SyncProcessor {
  pub fn new() -> Self {
    Self
  }

  /// Run `jobs` and merge their results.
  ///
  /// Each store runs inside every wrapper in `transactions`, outermost
  /// first, so one job commits atomically across several backends. Stores
  /// run on the blocking pool and finish even if this future is dropped.
  pub async fn run_sync<P>(
    &self,
    jobs: &[Arc<dyn SyncJob<P>>],
    transactions: &[Arc<dyn Transactional>],
    params: &P,
    forced: bool,
  ) -> SyncOutcome
  where
    P: Send + Sync,
  {
    let runs = jobs
      .iter()
      .map(|job| run_job(job.as_ref(), transactions, params, forced));

    let mut results = Vec::with_capacity(jobs.len());
    for outcome in join_all(runs).await {
      results.push(outcome?);
    }

    let merged = SyncResult::merge_all(results);
    debug!(jobs = jobs.len(), forced, result = %merged, "Sync run finished");
    Ok(merged)
  }
}

async fn run_job<P>(
  job: &dyn SyncJob<P>,
  transactions: &[Arc<dyn Transactional>],
  params: &P,
  forced: bool,
) -> SyncOutcome
where
  P: Send + Sync,
{
  let Some(gate) = job.should_run(params, forced).await else {
    trace!(job = job.name(), "Job skipped");
    return Ok(SyncResult::Skipped);
  };

  let result = match job.prepare(params).await {
    Prepared::Unchanged => SyncResult::Updated,
    Prepared::Finished(result) => result,
    Prepared::Ready {
      errors,
      store,
      hash,
    } => {
      commit(transactions, store).await?;
      match ErrorList::from_vec(errors) {
        Some(errors) => SyncResult::Problem(errors),
        None => {
          if let Some(hash) = hash {
            hash.commit();
          }
          SyncResult::Updated
        }
      }
    }
  };

  if let SyncResult::Problem(errors) = &result {
    warn!(
      job = job.name(),
      errors = errors.len(),
      first = %errors.first(),
      "Sync job reported problems"
    );
  } else {
    debug!(job = job.name(), result = %result, "Sync job finished");
  }

  gate.close(&result);
  Ok(result)
}

async fn commit(transactions: &[Arc<dyn Transactional>], mut store: StoreCall) -> Result<()> {
  let transactions = transactions.to_vec();
  tokio::task::spawn_blocking(move || run_nested(&transactions, &mut store))
    .await
    .map_err(|e| eyre!("Store task failed: {}", e))?
}

fn run_nested(transactions: &[Arc<dyn Transactional>], store: &mut StoreCall) -> Result<()> {
  match transactions.split_first() {
    None => store(),
    Some((outer, inner)) => outer.run_in_transaction(&mut || run_nested(inner, store)),
  }
}
