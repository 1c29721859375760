//! Courier Pipeline - run orchestration
//!
//! For each source location: redeliver events a previous run left in a
//! retriable state, then read the positions no BLOB record covers yet,
//! delivering and checkpointing blob by blob.

pub mod error;
pub mod pipeline;
pub mod report;

pub use error::PipelineError;
pub use pipeline::{Pipeline, RunMode};
pub use report::{RunReport, Tally};
