//! Domain types of the cafeteria data.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one cafeteria ("subsystem") upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubsystemId(pub u32);

impl fmt::Display for SubsystemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Content language. The API serves every resource in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  #[default]
  Cs,
  En,
}

impl Language {
  pub const ALL: [Language; 2] = [Language::Cs, Language::En];

  pub fn code(self) -> &'static str {
    match self {
      Language::Cs => "cs",
      Language::En => "en",
    }
  }

  pub fn from_code(code: &str) -> Option<Self> {
    match code.trim().to_lowercase().as_str() {
      "cs" | "cz" => Some(Language::Cs),
      "en" => Some(Language::En),
      _ => None,
    }
  }
}

impl fmt::Display for Language {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.code())
  }
}

/// Parameters of every per-cafeteria sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubsystemParams {
  pub subsystem: SubsystemId,
  pub language: Language,
}

impl SubsystemParams {
  pub fn new(subsystem: SubsystemId, language: Language) -> Self {
    Self {
      subsystem,
      language,
    }
  }

  /// Storage partition of this cafeteria's records.
  pub fn partition(&self) -> String {
    format!("{}_{}", self.subsystem, self.language.code())
  }
}

impl fmt::Display for SubsystemParams {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "subsystem {} ({})", self.subsystem, self.language)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsystem {
  pub id: SubsystemId,
  pub name: String,
  pub description: Option<String>,
  /// Closed cafeterias are listed but not synced
  pub opened: bool,
  pub supports_week: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
  pub id: u64,
  pub subsystem: SubsystemId,
  pub category: String,
  pub name: String,
  pub amount: Option<String>,
  pub price_student: Option<f64>,
  pub price_normal: Option<f64>,
  pub allergens: Vec<u32>,
  pub photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekDish {
  pub id: u64,
  pub subsystem: SubsystemId,
  pub date: NaiveDate,
  pub category: String,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
  pub id: u64,
  pub subsystem: SubsystemId,
  pub role: String,
  pub name: String,
  pub phone: Option<String>,
  pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
  pub id: u64,
  pub subsystem: SubsystemId,
  pub title: String,
  /// Day range as published, e.g. "Po - Pá"
  pub days: String,
  pub from: NaiveTime,
  pub to: NaiveTime,
}

/// Contacts and opening hours of one cafeteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsystemInfo {
  pub contacts: Vec<Contact>,
  pub opening_hours: Vec<OpeningHours>,
}
