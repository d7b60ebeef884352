//! Non-fatal sync error taxonomy.
//!
//! These errors travel inside [`SyncResult::Problem`](super::SyncResult) and
//! are shown to the user. Fatal failures (storage, transactions) are
//! `color_eyre::Report`s and never end up here.

use thiserror::Error;

/// An error that degrades a sync without aborting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
  /// The request did not complete in time
  #[error("Request timed out")]
  Timeout,

  /// The upstream server could not be reached
  #[error("No connection to the server")]
  NoConnection,

  /// The connection dropped before the response was complete
  #[error("Connection closed unexpectedly")]
  ConnectionClosed,

  /// The response body could not be decoded
  #[error("Failed to decode response: {0}")]
  Serialization(String),

  /// The server answered with an unexpected status
  #[error("Server returned status {0}")]
  Http(u16),

  /// A single record of an otherwise usable payload was rejected
  #[error("Malformed {kind} record: {reason}")]
  MalformedRecord { kind: &'static str, reason: String },

  /// The requested week is not offered by the upstream source
  #[error("The requested week is not available")]
  WeekNotAvailable,

  /// The source is closed or disabled; an expected steady state
  #[error("Unavailable: {0}")]
  Unavailable(String),

  /// A fatal error isolated to one fan-out branch
  #[error("Internal error: {0}")]
  Internal(String),
}

impl SyncError {
  /// Shorthand for [`SyncError::MalformedRecord`].
  pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
    Self::MalformedRecord {
      kind,
      reason: reason.into(),
    }
  }

  /// Whether this error means "closed", which maps to `SyncResult::Unavailable`
  /// instead of a problem.
  pub fn is_unavailable(&self) -> bool {
    matches!(self, Self::Unavailable(_))
  }

  /// Network-level failures, worth retrying later.
  pub fn is_network(&self) -> bool {
    matches!(
      self,
      Self::Timeout
        | Self::NoConnection
        | Self::ConnectionClosed
        | Self::Serialization(_)
        | Self::Http(_)
    )
  }

  /// Display priority when several errors compete for one message.
  /// Lower wins.
  pub(crate) fn priority(&self) -> u8 {
    match self {
      Self::Unavailable(_) => 0,
      Self::WeekNotAvailable => 1,
      _ => 2,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_malformed_display() {
    let err = SyncError::malformed("dish", "missing name");
    assert_eq!(err.to_string(), "Malformed dish record: missing name");
  }

  #[test]
  fn test_classification() {
    assert!(SyncError::Timeout.is_network());
    assert!(SyncError::Http(503).is_network());
    assert!(!SyncError::WeekNotAvailable.is_network());
    assert!(SyncError::Unavailable("closed".into()).is_unavailable());
    assert!(!SyncError::NoConnection.is_unavailable());
  }
}
