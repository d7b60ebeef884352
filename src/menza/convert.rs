//! Conversion of API payloads into domain records.
//!
//! Each record is converted on its own; a malformed one is reported and
//! dropped while the rest of the payload is kept.

use chrono::{NaiveDate, NaiveTime};

use super::dto::{ApiContact, ApiDish, ApiOpeningHours, ApiSubsystem, ApiWeekDish};
use super::types::{Contact, Dish, OpeningHours, Subsystem, SubsystemId, WeekDish};
use crate::sync::{Accumulated, SyncError};

fn required<T>(value: Option<T>, kind: &'static str, field: &str) -> Result<T, SyncError> {
  value.ok_or_else(|| SyncError::malformed(kind, format!("missing {}", field)))
}

fn required_text(
  value: Option<String>,
  kind: &'static str,
  field: &str,
) -> Result<String, SyncError> {
  let text = required(value, kind, field)?;
  let text = text.trim();
  if text.is_empty() {
    return Err(SyncError::malformed(kind, format!("empty {}", field)));
  }
  Ok(text.to_string())
}

/// Blank strings count as absent.
fn optional_text(value: Option<String>) -> Option<String> {
  value
    .map(|text| text.trim().to_string())
    .filter(|text| !text.is_empty())
}

fn parse_time(
  value: Option<String>,
  kind: &'static str,
  field: &str,
) -> Result<NaiveTime, SyncError> {
  let raw = required_text(value, kind, field)?;
  NaiveTime::parse_from_str(&raw, "%H:%M")
    .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
    .map_err(|e| SyncError::malformed(kind, format!("bad {} {:?}: {}", field, raw, e)))
}

pub fn subsystem(api: ApiSubsystem) -> Result<Subsystem, SyncError> {
  Ok(Subsystem {
    id: SubsystemId(required(api.id, "subsystem", "id")?),
    name: required_text(api.name, "subsystem", "name")?,
    description: optional_text(api.description),
    opened: api.open.unwrap_or(true),
    supports_week: api.week_menu.unwrap_or(false),
  })
}

pub fn subsystems(payload: Vec<ApiSubsystem>) -> Accumulated<Vec<Subsystem>> {
  Accumulated::from_results(payload.into_iter().map(subsystem))
}

pub fn dish(subsystem: SubsystemId, api: ApiDish) -> Result<Dish, SyncError> {
  let price = |price: Option<f64>| price.filter(|p| p.is_finite() && *p >= 0.0);
  Ok(Dish {
    id: required(api.id, "dish", "id")?,
    subsystem,
    category: required_text(api.category, "dish", "category")?,
    name: required_text(api.name, "dish", "name")?,
    amount: optional_text(api.amount),
    price_student: price(api.price_student),
    price_normal: price(api.price_normal),
    allergens: api.allergens,
    photo: optional_text(api.photo),
  })
}

/// Hidden dishes are skipped silently.
pub fn dishes(subsystem: SubsystemId, payload: Vec<ApiDish>) -> Accumulated<Vec<Dish>> {
  Accumulated::from_results(
    payload
      .into_iter()
      .filter(|api| api.active.unwrap_or(true))
      .map(|api| dish(subsystem, api)),
  )
}

pub fn week_dish(subsystem: SubsystemId, api: ApiWeekDish) -> Result<WeekDish, SyncError> {
  let raw_date = required_text(api.date, "week dish", "date")?;
  let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
    .map_err(|e| SyncError::malformed("week dish", format!("bad date {:?}: {}", raw_date, e)))?;

  Ok(WeekDish {
    id: required(api.id, "week dish", "id")?,
    subsystem,
    date,
    category: required_text(api.category, "week dish", "category")?,
    name: required_text(api.name, "week dish", "name")?,
  })
}

pub fn week_dishes(
  subsystem: SubsystemId,
  payload: Vec<ApiWeekDish>,
) -> Accumulated<Vec<WeekDish>> {
  // Stable day order regardless of the payload order
  Accumulated::from_results(payload.into_iter().map(|api| week_dish(subsystem, api))).map(
    |mut dishes| {
      dishes.sort_by_key(|dish| dish.date);
      dishes
    },
  )
}

pub fn contact(subsystem: SubsystemId, api: ApiContact) -> Result<Contact, SyncError> {
  let phone = optional_text(api.phone);
  let email = optional_text(api.email);
  if phone.is_none() && email.is_none() {
    return Err(SyncError::malformed("contact", "neither phone nor email"));
  }

  Ok(Contact {
    id: required(api.id, "contact", "id")?,
    subsystem,
    role: optional_text(api.role).unwrap_or_default(),
    name: required_text(api.name, "contact", "name")?,
    phone,
    email,
  })
}

pub fn contacts(subsystem: SubsystemId, payload: Vec<ApiContact>) -> Accumulated<Vec<Contact>> {
  Accumulated::from_results(payload.into_iter().map(|api| contact(subsystem, api)))
}

pub fn opening_hours(
  subsystem: SubsystemId,
  api: ApiOpeningHours,
) -> Result<OpeningHours, SyncError> {
  let from = parse_time(api.time_from, "opening hours", "start")?;
  let to = parse_time(api.time_to, "opening hours", "end")?;
  if to <= from {
    return Err(SyncError::malformed(
      "opening hours",
      format!("closes at {} before opening at {}", to, from),
    ));
  }

  let first_day = required_text(api.days_from, "opening hours", "first day")?;
  let days = match optional_text(api.days_to) {
    Some(last_day) if last_day != first_day => format!("{} - {}", first_day, last_day),
    _ => first_day,
  };

  Ok(OpeningHours {
    id: required(api.id, "opening hours", "id")?,
    subsystem,
    title: optional_text(api.title).unwrap_or_default(),
    days,
    from,
    to,
  })
}

pub fn all_opening_hours(
  subsystem: SubsystemId,
  payload: Vec<ApiOpeningHours>,
) -> Accumulated<Vec<OpeningHours>> {
  Accumulated::from_results(payload.into_iter().map(|api| opening_hours(subsystem, api)))
}
