//! Time-boxed cache validity.
//!
//! Decides whether it is worth asking the server at all, based on when a
//! dataset was last synced successfully. Day and week boundaries are
//! computed in one canonical time zone so the answer does not depend on the
//! device locale.

mod checker;
mod clock;
mod key;

pub use checker::{Freshness, ValidityChecker, DEFAULT_RECENT_WINDOW, DEFAULT_TIME_ZONE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::ValidityKey;
