//! Concurrent sync across many independent sources.

use futures::future::join_all;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

use super::error::SyncError;
use super::result::{ErrorList, SyncOutcome, SyncResult};

/// How a single source failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
  Problem(ErrorList),
  Unavailable,
  /// The sync aborted with a storage error
  Fatal(String),
}

#[derive(Debug, Clone)]
pub struct SourceFailure<P> {
  pub params: P,
  pub kind: FailureKind,
}

impl<P: fmt::Display> fmt::Display for SourceFailure<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      FailureKind::Problem(errors) => write!(f, "{}: {}", self.params, errors.most_relevant()),
      FailureKind::Unavailable => write!(f, "{}: unavailable", self.params),
      FailureKind::Fatal(message) => write!(f, "{}: {}", self.params, message),
    }
  }
}

/// Combined outcome of a fan-out.
#[derive(Debug, Clone)]
pub struct FanOutOutcome<P> {
  pub combined: SyncResult,
  /// Failed sources in input order
  pub failures: Vec<SourceFailure<P>>,
}

impl<P> FanOutOutcome<P> {
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }

  pub fn failed(&self, params: &P) -> Option<&FailureKind>
  where
    P: PartialEq,
  {
    self
      .failures
      .iter()
      .find(|failure| &failure.params == params)
      .map(|failure| &failure.kind)
  }
}

/// Run `sync` for every entry of `params` concurrently.
///
/// A failure of one source never cancels the others. Fatal errors are
/// downgraded to a problem of that source. Results are folded pairwise.
pub async fn fan_out<P, F, Fut>(params: impl IntoIterator<Item = P>, sync: F) -> FanOutOutcome<P>
where
  P: Clone + fmt::Display,
  F: Fn(P) -> Fut,
  Fut: Future<Output = SyncOutcome>,
{
  let params: Vec<P> = params.into_iter().collect();
  let outcomes = join_all(params.iter().cloned().map(&sync)).await;

  let mut results = Vec::with_capacity(params.len());
  let mut failures = Vec::new();

  for (params, outcome) in params.into_iter().zip(outcomes) {
    let result = match outcome {
      Ok(result) => result,
      Err(report) => {
        warn!(source = %params, error = %report, "Sync of source aborted");
        let message = format!("{:#}", report);
        failures.push(SourceFailure {
          params,
          kind: FailureKind::Fatal(message.clone()),
        });
        results.push(SyncResult::problem(SyncError::Internal(message)));
        continue;
      }
    };

    match &result {
      SyncResult::Problem(errors) => failures.push(SourceFailure {
        params,
        kind: FailureKind::Problem(errors.clone()),
      }),
      SyncResult::Unavailable => failures.push(SourceFailure {
        params,
        kind: FailureKind::Unavailable,
      }),
      SyncResult::Updated | SyncResult::Skipped => {}
    }
    results.push(result);
  }

  let combined = reduce_pairwise(results);
  debug!(failures = failures.len(), result = %combined, "Fan-out finished");
  FanOutOutcome { combined, failures }
}

/// Merge neighbours until one result is left.
fn reduce_pairwise(mut results: Vec<SyncResult>) -> SyncResult {
  while results.len() > 1 {
    let mut next = Vec::with_capacity(results.len().div_ceil(2));
    let mut iter = results.into_iter();
    while let Some(left) = iter.next() {
      next.push(match iter.next() {
        Some(right) => left.merge(right),
        None => left,
      });
    }
    results = next;
  }
  results.pop().unwrap_or(SyncResult::Skipped)
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_empty_fan_out_is_skipped() {
    let outcome = fan_out(Vec::<u32>::new(), |_| async { Ok(SyncResult::Updated) }).await;
    assert_eq!(outcome.combined, SyncResult::Skipped);
    assert!(outcome.is_clean());
  }

  #[tokio::test]
  async fn test_failures_are_isolated() {
    let outcome = fan_out(vec![1u32, 2, 3, 4], |id| async move {
      match id {
        2 => Ok(SyncResult::problem(SyncError::Timeout)),
        3 => Err(eyre!("disk full")),
        _ => Ok(SyncResult::Updated),
      }
    })
    .await;

    assert!(outcome.combined.is_problem());
    let errors = outcome.combined.errors().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(outcome.failures.len(), 2);
    assert_eq!(
      outcome.failed(&2),
      Some(&FailureKind::Problem(ErrorList::one(SyncError::Timeout)))
    );
    assert!(matches!(
      outcome.failed(&3),
      Some(FailureKind::Fatal(message)) if message.contains("disk full")
    ));
    assert_eq!(outcome.failed(&1), None);
  }

  #[tokio::test]
  async fn test_unavailable_wins() {
    let outcome = fan_out(vec![1u32, 2, 3], |id| async move {
      match id {
        1 => Ok(SyncResult::problem(SyncError::NoConnection)),
        2 => Ok(SyncResult::Unavailable),
        _ => Ok(SyncResult::Skipped),
      }
    })
    .await;

    assert_eq!(outcome.combined, SyncResult::Unavailable);
    assert_eq!(outcome.failed(&2), Some(&FailureKind::Unavailable));
  }

  #[tokio::test]
  async fn test_sources_run_concurrently() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let outcome = fan_out(vec![1u32, 2, 3], |_| {
      let running = running.clone();
      let peak = peak.clone();
      async move {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        running.fetch_sub(1, Ordering::SeqCst);
        Ok(SyncResult::Updated)
      }
    })
    .await;

    assert_eq!(outcome.combined, SyncResult::Updated);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_pairwise_matches_sequential_merge() {
    let results = vec![
      SyncResult::Updated,
      SyncResult::problem(SyncError::Timeout),
      SyncResult::Skipped,
      SyncResult::problem(SyncError::NoConnection),
      SyncResult::Updated,
    ];
    let sequential = SyncResult::merge_all(results.clone());
    assert_eq!(reduce_pairwise(results), sequential);
  }
}
