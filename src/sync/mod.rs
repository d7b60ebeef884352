//! The sync engine: jobs, their results and the processor running them.

mod accumulate;
mod error;
mod fanout;
mod job;
mod processor;
mod result;
mod source;

pub use accumulate::Accumulated;
pub use error::SyncError;
pub use fanout::{fan_out, FailureKind, FanOutOutcome, SourceFailure};
pub use job::{Fetched, Gate, Job, Prepared, StoreCall, SyncJob};
pub use processor::{SyncProcessor, Transactional};
pub use result::{ErrorList, SyncOutcome, SyncResult};
pub use source::SyncSource;
