//! Client-side sync layer for cafeteria menus, contacts and opening hours.
//!
//! Each dataset is refreshed by [`sync::SyncJob`]s that first ask the
//! [`validity::ValidityChecker`] (and, for today's dishes, the
//! [`hash::HashStore`]) whether a download is needed at all. The
//! [`sync::SyncProcessor`] runs the jobs and merges their results, and
//! [`sync::fan_out`] spreads a sync over many cafeterias at once.

pub mod config;
pub mod db;
pub mod hash;
pub mod kv;
pub mod menza;
pub mod refresh;
pub mod sync;
pub mod validity;
