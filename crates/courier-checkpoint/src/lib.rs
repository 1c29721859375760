//! Append-only checkpoint log for resumable delivery runs
//!
//! Answers two questions for a rerun: which source ranges were already
//! processed, and which failed events are still waiting for another try.

pub mod error;
pub mod log;
pub mod record;
pub mod store;

pub use error::CheckpointError;
pub use log::{AppendLog, JsonlLog, MemoryLog};
pub use record::{CheckpointRecord, EntityType};
pub use store::{
    CheckpointStore, DEFAULT_APPEND_RETRIES, LocationStatus, PendingRetries, StoreStatus,
    event_code,
};
