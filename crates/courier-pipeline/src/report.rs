//! Aggregate outcome of a run

use std::time::Duration;

use courier_core::{Blob, fmt_num};

/// Per-event tallies. Every event read lands in exactly one of
/// `delivered`, `failed_retriable`, `failed_non_retriable` or `rejected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub delivered: usize,
    /// Still failing with a retriable code after the last attempt
    pub failed_retriable: usize,
    /// Refused by the destination
    pub failed_non_retriable: usize,
    /// Never sent: failed validation or over the per-item size limit
    pub rejected: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.delivered + self.failed_retriable + self.failed_non_retriable + self.rejected
    }

    pub fn add(&mut self, other: Tally) {
        self.delivered += other.delivered;
        self.failed_retriable += other.failed_retriable;
        self.failed_non_retriable += other.failed_non_retriable;
        self.rejected += other.rejected;
    }

    /// Tally of a processed blob whose first `rejected` failed events were
    /// never sent.
    pub(crate) fn of_blob(blob: &Blob, rejected: usize) -> Self {
        let delivered = blob.reports.iter().filter(|r| r.outcome.is_delivered()).count();
        let sent = blob.failed_events.get(rejected..).unwrap_or_default();
        let retriable = sent.iter().filter(|f| f.code.is_retriable()).count();
        Self {
            delivered,
            failed_retriable: retriable,
            failed_non_retriable: sent.len() - retriable,
            rejected: rejected.min(blob.failed_events.len()),
        }
    }
}

/// Summary of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub events: Tally,
    /// Source blobs processed and checkpointed
    pub blobs_read: usize,
    /// Blobs of previously failed events redelivered
    pub retry_blobs: usize,
    /// Source spans skipped because their fetch failed
    pub gaps: usize,
    pub locations: usize,
    /// Stopped early on a shutdown request
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.events.failed_retriable == 0
            && self.events.failed_non_retriable == 0
            && self.events.rejected == 0
            && self.gaps == 0
            && !self.interrupted
    }

    pub fn log(&self) {
        log::info!("=== Delivery Summary ===");
        log::info!(
            "Blobs: {} read, {} retry, {} gaps across {} locations",
            self.blobs_read,
            self.retry_blobs,
            self.gaps,
            self.locations
        );
        log::info!(
            "Events: {} delivered, {} failed (retriable), {} failed (permanent), {} rejected",
            fmt_num(self.events.delivered),
            fmt_num(self.events.failed_retriable),
            fmt_num(self.events.failed_non_retriable),
            fmt_num(self.events.rejected)
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        if self.events.delivered > 0 && !self.elapsed.is_zero() {
            let per_sec = self.events.delivered as f64 / self.elapsed.as_secs_f64();
            log::info!("Throughput: {per_sec:.0} events/sec");
        }
        if self.interrupted {
            log::warn!("Run interrupted; rerun to continue from the last checkpoint");
        }
    }
}
