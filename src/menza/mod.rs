//! Cafeteria data: domain types, the remote API and the sync sources.

pub mod api;
pub mod convert;
pub mod dto;
mod engine;
pub mod sources;
mod types;

pub use api::{HttpMenzaApi, MenzaApi};
pub use engine::{Menza, SyncReport};
pub use sources::{InfoSource, SubsystemSource, SyncContext, TodayDishSource, WeekSource};
pub use types::{
  Contact, Dish, Language, OpeningHours, Subsystem, SubsystemId, SubsystemInfo, SubsystemParams,
  WeekDish,
};
