//! Bounded exponential-backoff delivery of one batch

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::batch::Batch;
use crate::error::{ErrorCode, SendError};
use crate::event::{DeliveryReport, Outcome};
use crate::sink::Sink;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before retry number `retry` (0-based): `base * 2^retry`.
pub fn backoff_duration(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total send attempts per batch, first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a single send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Success,
    PartialFailure,
    FullFailure,
}

/// How a batch ended up after all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    AllDelivered,
    /// Every failure left is permanent
    SomeFailedNonRetriable,
    /// Retriable failures remain after the last attempt
    SomeFailedRetriableExhausted,
}

/// Per-item outcome of [`RetryController::deliver`].
#[derive(Debug, Clone)]
pub struct Delivery {
    /// One report per batch item, in batch order, indexed by blob index
    pub reports: Vec<DeliveryReport>,
    pub attempts: Vec<AttemptState>,
    pub terminal: Terminal,
}

impl Delivery {
    pub fn delivered(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_delivered()).count()
    }

    /// `(blob index, code)` of every item that did not get through.
    pub fn failures(&self) -> impl Iterator<Item = (usize, ErrorCode)> + '_ {
        self.reports
            .iter()
            .filter_map(|r| r.outcome.error_code().map(|c| (r.index, c)))
    }
}

/// Wraps [`Sink::send`] with retries of the still-failing subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `batch`, retrying items whose failure is retriable.
    ///
    /// Only an authentication failure is returned as `Err`; every other
    /// failure ends up in [`Delivery::reports`].
    pub fn deliver(&self, sink: &dyn Sink, batch: &Batch) -> Result<Delivery, SendError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut settled: BTreeMap<usize, (Outcome, Option<Arc<str>>)> = BTreeMap::new();
        let mut attempts = Vec::new();
        let mut remaining = batch.clone();

        while !remaining.is_empty() {
            let attempt = attempts.len() as u32 + 1;
            log::debug!(
                "{}: sending {} items (attempt {attempt}/{max_attempts})",
                sink.name(),
                remaining.len()
            );
            let (outcomes, raw) = self.send_once(sink, &remaining)?;
            let raw: Option<Arc<str>> = raw.map(Arc::from);

            let mut retry = BTreeSet::new();
            for (item, outcome) in remaining.items().iter().zip(&outcomes) {
                if matches!(outcome, Outcome::Failed(code) if code.is_retriable()) {
                    retry.insert(item.index);
                }
                settled.insert(item.index, (*outcome, raw.clone()));
            }

            let failed = outcomes.iter().filter(|o| !o.is_delivered()).count();
            attempts.push(match failed {
                0 => AttemptState::Success,
                n if n == outcomes.len() => AttemptState::FullFailure,
                _ => AttemptState::PartialFailure,
            });

            if retry.is_empty() {
                break;
            }
            if attempt >= max_attempts {
                log::warn!(
                    "{}: {} items still failing after {attempt} attempts",
                    sink.name(),
                    retry.len()
                );
                break;
            }
            let delay = backoff_duration(self.policy.base_delay, attempt - 1);
            log::debug!(
                "{}: {} retriable failures, retrying in {delay:?}",
                sink.name(),
                retry.len()
            );
            std::thread::sleep(delay);
            remaining = remaining.subset(&retry);
        }

        let reports: Vec<DeliveryReport> = batch
            .indices()
            .into_iter()
            .filter_map(|index| {
                settled.remove(&index).map(|(outcome, raw_response)| DeliveryReport {
                    index,
                    outcome,
                    raw_response,
                })
            })
            .collect();
        let terminal = terminal_state(&reports);
        Ok(Delivery {
            reports,
            attempts,
            terminal,
        })
    }

    /// One send, normalized to one outcome per item.
    fn send_once(
        &self,
        sink: &dyn Sink,
        batch: &Batch,
    ) -> Result<(Vec<Outcome>, Option<String>), SendError> {
        match sink.send(batch) {
            Ok(report) if report.outcomes.len() == batch.len() => {
                Ok((report.outcomes, report.raw_response))
            }
            Ok(report) => {
                log::warn!(
                    "{}: {} outcomes for {} items, treating batch as malformed",
                    sink.name(),
                    report.outcomes.len(),
                    batch.len()
                );
                Ok((
                    vec![Outcome::Failed(ErrorCode::MalformedResponse); batch.len()],
                    report.raw_response,
                ))
            }
            Err(e @ SendError::Authentication(_)) => Err(e),
            Err(SendError::Batch { code, message }) => {
                log::debug!("{}: batch failed: {code}: {message}", sink.name());
                Ok((vec![Outcome::Failed(code); batch.len()], Some(message)))
            }
        }
    }
}

fn terminal_state(reports: &[DeliveryReport]) -> Terminal {
    let mut any_failed = false;
    for report in reports {
        match report.outcome {
            Outcome::Failed(code) if code.is_retriable() => {
                return Terminal::SomeFailedRetriableExhausted;
            }
            Outcome::Failed(_) => any_failed = true,
            Outcome::Delivered => {}
        }
    }
    if any_failed {
        Terminal::SomeFailedNonRetriable
    } else {
        Terminal::AllDelivered
    }
}
