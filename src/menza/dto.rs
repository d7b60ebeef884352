//! Serde types matching the API responses.
//!
//! Every field is optional; required ones are checked during conversion so a
//! single bad record does not fail the whole payload.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSubsystem {
  pub id: Option<u32>,
  pub name: Option<String>,
  pub description: Option<String>,
  pub open: Option<bool>,
  #[serde(rename = "weekMenu")]
  pub week_menu: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiDish {
  pub id: Option<u64>,
  pub category: Option<String>,
  pub name: Option<String>,
  pub amount: Option<String>,
  #[serde(rename = "priceStudent")]
  pub price_student: Option<f64>,
  #[serde(rename = "priceNormal")]
  pub price_normal: Option<f64>,
  #[serde(default)]
  pub allergens: Vec<u32>,
  pub photo: Option<String>,
  /// Dishes hidden by the kitchen staff
  pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiWeekDish {
  pub id: Option<u64>,
  pub date: Option<String>,
  pub category: Option<String>,
  pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiContact {
  pub id: Option<u64>,
  pub role: Option<String>,
  pub name: Option<String>,
  pub phone: Option<String>,
  pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiOpeningHours {
  pub id: Option<u64>,
  pub title: Option<String>,
  #[serde(rename = "daysFrom")]
  pub days_from: Option<String>,
  #[serde(rename = "daysTo")]
  pub days_to: Option<String>,
  #[serde(rename = "timeFrom")]
  pub time_from: Option<String>,
  #[serde(rename = "timeTo")]
  pub time_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiHash {
  pub hash: String,
}
