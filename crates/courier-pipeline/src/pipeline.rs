//! Run orchestration: retry pass, then resumable read pass, per location

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use courier_checkpoint::CheckpointStore;
use courier_core::{
    Blob, BlobReader, Config, ErrorCode, Event, PagedSource, ProgressContext, RetryController,
    SharedProgress, ShutdownSignal, Sink, batch, fmt_num, validate_blob,
};
use indicatif::ProgressBar;

use crate::error::PipelineError;
use crate::report::{RunReport, Tally};

/// Non-TTY progress line cadence.
const LOG_EVERY_BLOBS: usize = 10;

/// Which passes a run performs for each location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Redeliver pending retries, then read everything not yet processed
    #[default]
    Full,
    /// Only redeliver pending retries; sources are never opened
    RetryOnly,
}

/// Drives events from sources through one sink, checkpointing as it goes.
pub struct Pipeline {
    config: Config,
    sink: Box<dyn Sink>,
    store: CheckpointStore,
    controller: RetryController,
    shutdown: ShutdownSignal,
    progress: SharedProgress,
}

impl Pipeline {
    pub fn new(
        config: Config,
        sink: Box<dyn Sink>,
        store: CheckpointStore,
    ) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        sink.limits()
            .validate()
            .map_err(|e| PipelineError::Configuration(format!("{}: {e}", sink.name())))?;
        let controller = RetryController::new(config.retry_policy());
        let store = store.with_page_size(config.page_size);
        Ok(Self {
            config,
            sink,
            store,
            controller,
            shutdown: ShutdownSignal::new(),
            progress: Arc::new(ProgressContext::hidden()),
        })
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Run every source in order under one RUN record.
    ///
    /// Stops at the first fatal error. Blobs checkpointed before the error
    /// stay checkpointed, so a rerun continues where this one stopped.
    pub fn run<S: PagedSource>(
        &mut self,
        sources: impl IntoIterator<Item = S>,
        mode: RunMode,
    ) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        let mut report = RunReport::empty();
        self.store.record_run()?;
        log::info!(
            "Run started: dag={} sink={} mode={mode:?}",
            self.store.dag_name(),
            self.sink.name()
        );

        for source in sources {
            if self.shutdown.is_requested() {
                report.interrupted = true;
                break;
            }
            report.locations += 1;
            let location = source.location().to_string();
            let pb = self.progress.location_line(&location);
            let result = self.run_location(source, &location, mode, &mut report, &pb);
            pb.finish_and_clear();
            result?;
        }

        report.elapsed = start.elapsed();
        Ok(report)
    }

    fn run_location<S: PagedSource>(
        &mut self,
        source: S,
        location: &str,
        mode: RunMode,
        report: &mut RunReport,
        pb: &ProgressBar,
    ) -> Result<(), PipelineError> {
        let mut tally = Tally::default();
        self.retry_pass(location, &mut tally, report, pb)?;

        if mode == RunMode::Full && !self.shutdown.is_requested() {
            let processed = self.store.processed_ranges(location)?;
            let mut reader = BlobReader::open(source, self.config.page_size, &processed)
                .map_err(|source| PipelineError::DataInConnector {
                    location: location.to_string(),
                    source,
                })?;
            for mut blob in reader.by_ref() {
                if self.shutdown.is_requested() {
                    log::info!("{location}: shutdown requested, stopping before [{}]", blob.position);
                    report.interrupted = true;
                    break;
                }
                let blob_tally = self.deliver_blob(&mut blob)?;
                self.checkpoint_blob(&blob)?;
                self.store
                    .record_blob(location, blob.position, blob.length)?;
                tally.add(blob_tally);
                report.blobs_read += 1;
                pb.set_message(progress_message(&tally));
                if !self.progress.is_tty() && report.blobs_read % LOG_EVERY_BLOBS == 0 {
                    log::info!(
                        "{location}: through position {}: {}",
                        blob.next_position(),
                        progress_message(&tally)
                    );
                } else {
                    log::debug!(
                        "{location}: [{}, {}) done, {} failed",
                        blob.position,
                        blob.next_position(),
                        blob.failed_events.len()
                    );
                }
            }
            report.gaps += reader.gaps().len();
        }

        if tally.total() > 0 || !self.progress.is_tty() {
            log::info!("{location}: {}", progress_message(&tally));
        }
        report.events.add(tally);
        Ok(())
    }

    /// Redeliver events whose last failure was retriable.
    ///
    /// The retry pass always drains: a shutdown request is honored only once
    /// the handed-out events are settled again.
    fn retry_pass(
        &mut self,
        location: &str,
        tally: &mut Tally,
        report: &mut RunReport,
        pb: &ProgressBar,
    ) -> Result<(), PipelineError> {
        let mut pending = self.store.pending_retries(location)?;
        if pending.is_empty() {
            return Ok(());
        }
        log::info!("{location}: redelivering {} events", fmt_num(pending.total()));

        while let Some(mut blob) = pending.next() {
            match self.deliver_blob(&mut blob) {
                Ok(blob_tally) => {
                    self.checkpoint_blob(&blob)?;
                    tally.add(blob_tally);
                    report.retry_blobs += 1;
                    pb.set_message(format!("retry: {}", progress_message(tally)));
                }
                Err(e) if e.is_authentication() => {
                    self.requeue(location, &blob, pending)?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Put events handed out for retry back into the pending set after an
    /// authentication abort. Failures already settled keep their code; the
    /// rest are recorded as authentication failures.
    fn requeue(
        &mut self,
        location: &str,
        blob: &Blob,
        rest: impl Iterator<Item = Blob>,
    ) -> Result<(), PipelineError> {
        self.store.record_failed_events(blob)?;

        let settled: BTreeSet<usize> = blob
            .reports
            .iter()
            .map(|r| r.index)
            .chain(blob.failed_events.iter().map(|f| f.index))
            .collect();
        let mut unsent: Vec<(u64, Event)> = blob
            .indexed_events()
            .filter(|(i, _)| !settled.contains(i))
            .map(|(i, e)| (blob.original_index(i), e.clone()))
            .collect();
        for later in rest {
            let indices: Vec<u64> = (0..later.events.len())
                .map(|i| later.original_index(i))
                .collect();
            unsent.extend(indices.into_iter().zip(later.events));
        }

        let mut leftover = Blob::redelivery(location, 0, unsent);
        for index in 0..leftover.events.len() {
            leftover.push_failed(index, ErrorCode::AuthenticationFailed);
        }
        let n = self.store.record_failed_events(&leftover)?;
        log::warn!("{location}: {n} retry events requeued after authentication failure");
        Ok(())
    }

    /// Validate, batch and send every event of `blob`, recording each
    /// failure on the blob under its blob index.
    fn deliver_blob(&self, blob: &mut Blob) -> Result<Tally, PipelineError> {
        let formatter = self.sink.formatter();
        let validated = validate_blob(formatter, blob);
        let batched = batch(validated.payloads, &self.sink.limits(), |p| {
            formatter.wire_size(p)
        })
        .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let rejected = validated.rejected.len() + batched.rejected.len();
        for (index, code) in validated.rejected.into_iter().chain(batched.rejected) {
            blob.push_failed(index, code);
        }

        for b in &batched.batches {
            let delivery = self.controller.deliver(self.sink.as_ref(), b)?;
            for report in delivery.reports {
                if let Some(code) = report.outcome.error_code() {
                    blob.push_failed(report.index, code);
                }
                blob.reports.push(report);
            }
        }
        Ok(Tally::of_blob(blob, rejected))
    }

    fn checkpoint_blob(&mut self, blob: &Blob) -> Result<(), PipelineError> {
        self.store.record_failed_events(blob)?;
        if self.config.record_reports {
            self.store.record_reports(blob)?;
        }
        Ok(())
    }
}

fn progress_message(tally: &Tally) -> String {
    format!(
        "{} delivered, {} failed, {} rejected",
        fmt_num(tally.delivered),
        fmt_num(tally.failed_retriable + tally.failed_non_retriable),
        fmt_num(tally.rejected)
    )
}
