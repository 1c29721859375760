//! Output connector contract

use crate::batch::{Batch, BatchLimits};
use crate::error::{ErrorCode, SendError};
use crate::event::Outcome;
use crate::format::PayloadFormatter;

/// Per-item result of one send, aligned with the batch order.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    pub outcomes: Vec<Outcome>,
    pub raw_response: Option<String>,
}

impl SendReport {
    /// Every item shares `outcome`.
    pub fn uniform(len: usize, outcome: Outcome, raw_response: Option<String>) -> Self {
        Self {
            outcomes: vec![outcome; len],
            raw_response,
        }
    }

    /// Items listed in `failures` (by position inside the batch) failed;
    /// everything else was delivered. Positions past `len` are ignored.
    pub fn from_failures(
        len: usize,
        failures: impl IntoIterator<Item = (usize, ErrorCode)>,
        raw_response: Option<String>,
    ) -> Self {
        let mut outcomes = vec![Outcome::Delivered; len];
        for (pos, code) in failures {
            if let Some(slot) = outcomes.get_mut(pos) {
                *slot = Outcome::Failed(code);
            } else {
                log::warn!("destination reported failure for out-of-range item {pos}");
            }
        }
        Self {
            outcomes,
            raw_response,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_delivered()).count()
    }
}

/// Delivers batches to one destination.
///
/// `send` performs one network call per batch, or one concurrent call per item
/// for destinations without a batch endpoint. Per-item failures come back as
/// [`Outcome::Failed`]; only batch-level and authentication failures are `Err`.
pub trait Sink {
    /// Short destination name for logs.
    fn name(&self) -> &str;

    fn limits(&self) -> BatchLimits;

    fn formatter(&self) -> &dyn PayloadFormatter;

    fn send(&self, batch: &Batch) -> Result<SendReport, SendError>;
}
