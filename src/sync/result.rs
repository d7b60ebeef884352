//! Per-job results and the rules for merging them.

use std::fmt;

use super::error::SyncError;

/// A list of sync errors that always holds at least one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorList(Vec<SyncError>);

impl ErrorList {
  pub fn one(error: SyncError) -> Self {
    Self(vec![error])
  }

  /// Returns `None` for an empty vector.
  pub fn from_vec(errors: Vec<SyncError>) -> Option<Self> {
    if errors.is_empty() {
      None
    } else {
      Some(Self(errors))
    }
  }

  pub fn first(&self) -> &SyncError {
    &self.0[0]
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn into_vec(self) -> Vec<SyncError> {
    self.0
  }

  /// Union of both lists, keeping order.
  pub fn concat(mut self, other: ErrorList) -> Self {
    self.0.extend(other.0);
    self
  }

  /// The error that should be shown when only one message fits.
  pub fn most_relevant(&self) -> &SyncError {
    self
      .0
      .iter()
      .min_by_key(|e| e.priority())
      .unwrap_or_else(|| self.first())
  }
}

impl<'a> IntoIterator for &'a ErrorList {
  type Item = &'a SyncError;
  type IntoIter = std::slice::Iter<'a, SyncError>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

/// Outcome of one sync job, or of a merged batch of jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
  /// New data was fetched (or confirmed unchanged) and stored
  Updated,
  /// Nothing was done, cached data is still valid
  Skipped,
  /// The source is closed or disabled
  Unavailable,
  /// Something went wrong; carries every error encountered
  Problem(ErrorList),
}

/// Result of a sync invocation. `Err` is reserved for fatal failures.
pub type SyncOutcome = color_eyre::Result<SyncResult>;

impl SyncResult {
  pub fn problem(error: SyncError) -> Self {
    Self::Problem(ErrorList::one(error))
  }

  /// Classify a job-level error.
  pub fn from_error(error: SyncError) -> Self {
    if error.is_unavailable() {
      Self::Unavailable
    } else {
      Self::problem(error)
    }
  }

  pub fn is_problem(&self) -> bool {
    matches!(self, Self::Problem(_))
  }

  pub fn errors(&self) -> Option<&ErrorList> {
    match self {
      Self::Problem(errors) => Some(errors),
      _ => None,
    }
  }

  /// Whether the validity timestamp of the job should be refreshed.
  pub(crate) fn marks_fresh(&self) -> bool {
    matches!(self, Self::Updated | Self::Unavailable)
  }

  /// Merge two results.
  ///
  /// `Skipped` is the identity, `Unavailable` dominates, problems are
  /// concatenated, otherwise the result is `Updated`.
  pub fn merge(self, other: SyncResult) -> SyncResult {
    use SyncResult::*;
    match (self, other) {
      (Skipped, other) | (other, Skipped) => other,
      (Unavailable, _) | (_, Unavailable) => Unavailable,
      (Problem(a), Problem(b)) => Problem(a.concat(b)),
      (Problem(a), Updated) | (Updated, Problem(a)) => Problem(a),
      (Updated, Updated) => Updated,
    }
  }

  /// Merge any number of results. An empty batch is `Skipped`.
  pub fn merge_all(results: impl IntoIterator<Item = SyncResult>) -> SyncResult {
    results
      .into_iter()
      .fold(SyncResult::Skipped, SyncResult::merge)
  }

  /// The single message a UI shows for this result, if any.
  pub fn headline(&self) -> Option<String> {
    match self {
      Self::Updated | Self::Skipped => None,
      Self::Unavailable => Some("Currently unavailable".to_string()),
      Self::Problem(errors) => Some(errors.most_relevant().to_string()),
    }
  }
}

impl fmt::Display for SyncResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Updated => write!(f, "updated"),
      Self::Skipped => write!(f, "skipped"),
      Self::Unavailable => write!(f, "unavailable"),
      Self::Problem(errors) => write!(f, "problem ({} errors)", errors.len()),
    }
  }
}
