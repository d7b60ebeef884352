//! Best-effort conversion results.

use super::error::SyncError;

/// A conversion result that keeps whatever could be salvaged together with
/// the errors encountered on the way.
///
/// A value is a success iff it is present and no errors were collected.
/// An absent value always comes with at least one error.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulated<R> {
  value: Option<R>,
  errors: Vec<SyncError>,
}

impl<R> Accumulated<R> {
  /// Everything converted cleanly.
  pub fn ok(value: R) -> Self {
    Self {
      value: Some(value),
      errors: Vec::new(),
    }
  }

  /// A usable value with some rejected parts.
  pub fn partial(value: R, errors: Vec<SyncError>) -> Self {
    Self {
      value: Some(value),
      errors,
    }
  }

  /// Nothing usable.
  pub fn failed(error: SyncError) -> Self {
    Self {
      value: None,
      errors: vec![error],
    }
  }

  pub fn is_success(&self) -> bool {
    self.value.is_some() && self.errors.is_empty()
  }

  pub fn value(&self) -> Option<&R> {
    self.value.as_ref()
  }

  pub fn errors(&self) -> &[SyncError] {
    &self.errors
  }

  pub fn map<U>(self, f: impl FnOnce(R) -> U) -> Accumulated<U> {
    Accumulated {
      value: self.value.map(f),
      errors: self.errors,
    }
  }

  pub fn into_parts(self) -> (Option<R>, Vec<SyncError>) {
    (self.value, self.errors)
  }
}

impl<T> Accumulated<Vec<T>> {
  /// Collect per-record results, keeping every record that converted.
  ///
  /// When every record was rejected there is nothing usable and the value
  /// is absent. An empty input is a clean, empty value.
  pub fn from_results(results: impl IntoIterator<Item = Result<T, SyncError>>) -> Self {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for result in results {
      match result {
        Ok(v) => values.push(v),
        Err(e) => errors.push(e),
      }
    }
    if values.is_empty() && !errors.is_empty() {
      return Self {
        value: None,
        errors,
      };
    }
    Self::partial(values, errors)
  }
}
