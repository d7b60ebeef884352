//! Identifiers for freshness records.

use std::fmt;

use crate::menza::{Language, SubsystemId};

/// Names one cached dataset whose freshness is tracked.
///
/// Keys are composed from a base name plus subsystem and language
/// qualifiers, e.g. `cs_agata_today_3`. They can only be built through the
/// factory functions below.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidityKey(String);

impl ValidityKey {
  fn base(name: &str) -> Self {
    Self(name.to_string())
  }

  fn for_subsystem(name: &str, subsystem: SubsystemId) -> Self {
    Self(format!("{}_{}", name, subsystem))
  }

  /// Prefix the key with a language qualifier.
  pub fn with_language(self, language: Language) -> Self {
    Self(format!("{}_{}", language.code(), self.0))
  }

  /// List of subsystems known to the upstream API.
  pub fn agata_subsystems() -> Self {
    Self::base("agata_subsystems")
  }

  /// Today's dishes of one subsystem.
  pub fn agata_today(subsystem: SubsystemId) -> Self {
    Self::for_subsystem("agata_today", subsystem)
  }

  /// Week menu of one subsystem.
  pub fn agata_week(subsystem: SubsystemId) -> Self {
    Self::for_subsystem("agata_week", subsystem)
  }

  pub fn agata_contacts(subsystem: SubsystemId) -> Self {
    Self::for_subsystem("agata_contacts", subsystem)
  }

  pub fn agata_opening_hours(subsystem: SubsystemId) -> Self {
    Self::for_subsystem("agata_opening", subsystem)
  }

  /// Rebuild a key that was previously persisted.
  pub(crate) fn from_persisted(raw: String) -> Self {
    Self(raw)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ValidityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_composition() {
    let key = ValidityKey::agata_today(SubsystemId(3)).with_language(Language::Cs);
    assert_eq!(key.as_str(), "cs_agata_today_3");
    assert_eq!(ValidityKey::agata_subsystems().as_str(), "agata_subsystems");
  }

  #[test]
  fn test_keys_compare_by_value() {
    let a = ValidityKey::agata_week(SubsystemId(1)).with_language(Language::En);
    let b = ValidityKey::agata_week(SubsystemId(1)).with_language(Language::En);
    let c = ValidityKey::agata_week(SubsystemId(1)).with_language(Language::Cs);
    assert_eq!(a, b);
    assert_ne!(a, c);
  }
}
