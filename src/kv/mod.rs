//! Settings persistence for freshness bookkeeping.
//!
//! The validity checker and the hash store keep their maps here so they
//! survive process restarts.

mod storage;

pub use storage::{KvStore, MemoryKvStore, SqliteKvStore};
