//! Checkpoint store: resume ranges, pending retries, cleanup
//!
//! Every query is a scan over the append log filtered by `dag_name` and
//! location. Nothing is ever updated in place:
//! - BLOB records say which source ranges were read and handled
//! - EVENT records hold failed events (type id = error code)
//! - RETRY records are high-water marks; EVENT records newer than the latest
//!   one are still pending

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use courier_core::{Blob, ErrorCode, Event, ResumeRange};

use crate::error::CheckpointError;
use crate::log::{AppendLog, JsonlLog};
use crate::record::{CheckpointRecord, EntityType};

pub const DEFAULT_APPEND_RETRIES: u32 = 3;

/// Strictly increasing microsecond timestamps within one process.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: Option<DateTime<Utc>>,
}

impl MonotonicClock {
    fn now(&mut self) -> DateTime<Utc> {
        let mut t = Utc::now().trunc_subsecs(6);
        if let Some(last) = self.last {
            if t <= last {
                t = last + TimeDelta::microseconds(1);
            }
        }
        self.last = Some(t);
        t
    }

    /// Never hand out a timestamp at or before `seen`.
    fn observe(&mut self, seen: DateTime<Utc>) {
        if self.last.is_none_or(|last| seen > last) {
            self.last = Some(seen);
        }
    }
}

/// Append-only checkpoint log for one DAG.
pub struct CheckpointStore {
    log: Box<dyn AppendLog>,
    dag_name: String,
    page_size: usize,
    append_retries: u32,
    append_backoff: Duration,
    clock: MonotonicClock,
}

impl CheckpointStore {
    pub fn new(log: impl AppendLog + 'static, dag_name: impl Into<String>) -> Self {
        Self {
            log: Box::new(log),
            dag_name: dag_name.into(),
            page_size: 1000,
            append_retries: DEFAULT_APPEND_RETRIES,
            append_backoff: Duration::from_millis(100),
            clock: MonotonicClock::default(),
        }
    }

    /// Store backed by a JSONL file.
    pub fn open_jsonl(path: impl AsRef<Path>, dag_name: &str) -> Result<Self, CheckpointError> {
        let log = JsonlLog::open(path)?;
        let mut store = Self::new(log, dag_name);
        // other processes may have written with a clock ahead of ours
        for record in store.log.scan()? {
            store.clock.observe(record.timestamp);
        }
        Ok(store)
    }

    /// Events per blob handed out by [`pending_retries`](Self::pending_retries).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Attempts per append before giving up, and the base pause between them.
    pub fn with_append_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.append_retries = attempts.max(1);
        self.append_backoff = backoff;
        self
    }

    pub fn dag_name(&self) -> &str {
        &self.dag_name
    }

    /// Append one record stamped with the store clock.
    pub fn record(
        &mut self,
        entity: EntityType,
        location: Option<&str>,
        position: Option<u64>,
        info: Option<String>,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let timestamp = self.clock.now();
        self.record_at(timestamp, entity, location, position, info)
    }

    fn record_at(
        &mut self,
        timestamp: DateTime<Utc>,
        entity: EntityType,
        location: Option<&str>,
        position: Option<u64>,
        info: Option<String>,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let record = CheckpointRecord {
            dag_name: self.dag_name.clone(),
            timestamp,
            type_id: entity.type_id(),
            location: location.map(str::to_string),
            position: position.map(|p| p.to_string()),
            info,
        };
        let mut attempt = 1;
        loop {
            match self.log.append(&record) {
                Ok(()) => return Ok(record),
                Err(e) if attempt < self.append_retries => {
                    log::warn!(
                        "checkpoint append {entity} failed (attempt {attempt}/{}): {e}",
                        self.append_retries
                    );
                    std::thread::sleep(self.append_backoff * attempt);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(CheckpointError::AppendLog {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    pub fn record_run(&mut self) -> Result<CheckpointRecord, CheckpointError> {
        self.record(EntityType::Run, None, None, None)
    }

    /// Mark `[position, position + length)` of `location` as processed.
    pub fn record_blob(
        &mut self,
        location: &str,
        position: u64,
        length: usize,
    ) -> Result<(), CheckpointError> {
        self.record(
            EntityType::Blob,
            Some(location),
            Some(position),
            Some(length.to_string()),
        )
        .map(|_| ())
    }

    /// One EVENT record per failed event of `blob`, positioned at the event's
    /// original index. Returns how many were written.
    pub fn record_failed_events(&mut self, blob: &Blob) -> Result<usize, CheckpointError> {
        for failed in &blob.failed_events {
            let info = serde_json::to_string(&failed.event).map_err(|e| {
                CheckpointError::Storage(std::io::Error::other(e))
            })?;
            self.record(
                EntityType::Event(failed.code),
                Some(&blob.location),
                Some(blob.original_index(failed.index)),
                Some(info),
            )?;
        }
        Ok(blob.failed_events.len())
    }

    /// One REPORT record per distinct raw response in `blob.reports`.
    pub fn record_reports(&mut self, blob: &Blob) -> Result<usize, CheckpointError> {
        let mut last: Option<&Arc<str>> = None;
        let mut written = 0;
        for report in &blob.reports {
            let Some(raw) = report.raw_response.as_ref() else {
                continue;
            };
            if last.is_some_and(|prev| Arc::ptr_eq(prev, raw)) {
                continue;
            }
            last = Some(raw);
            self.record(
                EntityType::Report,
                Some(&blob.location),
                Some(blob.original_index(report.index)),
                Some(raw.to_string()),
            )?;
            written += 1;
        }
        Ok(written)
    }

    /// BLOB ranges of `location`, ordered by position.
    pub fn processed_ranges(&self, location: &str) -> Result<Vec<ResumeRange>, CheckpointError> {
        let mut ranges: Vec<ResumeRange> = self
            .log
            .scan()?
            .iter()
            .filter(|r| r.type_id == EntityType::BLOB_ID && r.belongs_to(&self.dag_name, location))
            .filter_map(|r| {
                let position = r.position_u64();
                let length = r.info.as_deref().and_then(|i| i.parse::<u64>().ok());
                match (position, length) {
                    (Some(position), Some(length)) => Some(ResumeRange { position, length }),
                    _ => {
                        log::warn!("{location}: ignoring malformed BLOB record {r:?}");
                        None
                    }
                }
            })
            .collect();
        ranges.sort();
        Ok(ranges)
    }

    /// Retriable failed events of `location` recorded after the latest RETRY
    /// marker, paged into blobs. Appends a new RETRY marker, so events handed
    /// out here are not handed out again.
    ///
    /// The marker time is taken before the scan and bounds it; events
    /// recorded concurrently land after the marker and wait for the next call.
    pub fn pending_retries(&mut self, location: &str) -> Result<PendingRetries, CheckpointError> {
        let marker = self.clock.now();
        let records = self.log.scan()?;
        let since = latest_retry(&records, &self.dag_name, location);

        let mut pending: Vec<&CheckpointRecord> = records
            .iter()
            .filter(|r| r.belongs_to(&self.dag_name, location))
            .filter(|r| is_pending(r, since) && r.timestamp <= marker)
            .filter(|r| {
                matches!(r.entity_type(), Some(EntityType::Event(code)) if code.is_retriable())
            })
            .collect();
        pending.sort_by_key(|r| r.timestamp);

        let events: Vec<(u64, Event)> = pending
            .into_iter()
            .filter_map(|r| {
                let info = r.info.as_deref()?;
                match serde_json::from_str::<Event>(info) {
                    Ok(event) => Some((r.position_u64().unwrap_or_default(), event)),
                    Err(e) => {
                        log::warn!("{location}: undecodable EVENT record: {e}");
                        None
                    }
                }
            })
            .collect();

        self.record_at(marker, EntityType::Retry, Some(location), None, None)?;
        if !events.is_empty() {
            log::info!("{location}: {} events pending retry", events.len());
        }
        Ok(PendingRetries::new(location, events, self.page_size))
    }

    /// Remove this DAG's records older than `older_than_days`.
    pub fn cleanup(&mut self, older_than_days: i64) -> Result<usize, CheckpointError> {
        if older_than_days < 1 {
            return Err(CheckpointError::InvalidConfig(format!(
                "cleanup needs at least 1 day, got {older_than_days}"
            )));
        }
        let cutoff = Utc::now() - TimeDelta::days(older_than_days);
        let dag = self.dag_name.clone();
        let removed = self
            .log
            .retain(&|r| r.dag_name != dag || r.timestamp >= cutoff)?;
        log::info!("checkpoint cleanup: removed {removed} records older than {older_than_days}d");
        Ok(removed)
    }

    /// Per-location summary of this DAG's records.
    pub fn status(&self) -> Result<StoreStatus, CheckpointError> {
        let records = self.log.scan()?;
        let mut last_run = None;
        let mut by_location: BTreeMap<&str, Vec<&CheckpointRecord>> = BTreeMap::new();
        for r in records.iter().filter(|r| r.dag_name == self.dag_name) {
            if r.type_id == EntityType::RUN_ID {
                last_run = last_run.max(Some(r.timestamp));
            }
            if let Some(location) = r.location.as_deref() {
                by_location.entry(location).or_default().push(r);
            }
        }

        let locations = by_location
            .into_iter()
            .map(|(location, records)| {
                let since = records
                    .iter()
                    .filter(|r| r.type_id == EntityType::RETRY_ID)
                    .map(|r| r.timestamp)
                    .max();
                let mut status = LocationStatus {
                    location: location.to_string(),
                    last_retry: since,
                    ..LocationStatus::default()
                };
                for r in records {
                    match r.entity_type() {
                        Some(EntityType::Blob) => {
                            status.blobs += 1;
                            status.rows += r.info.as_deref().and_then(|i| i.parse::<u64>().ok()).unwrap_or(0);
                        }
                        Some(EntityType::Event(code)) if code.is_retriable() => {
                            if is_pending(r, since) {
                                status.pending_retriable += 1;
                            }
                        }
                        Some(EntityType::Event(_)) => status.permanent_failures += 1,
                        Some(EntityType::Report) => status.reports += 1,
                        _ => {}
                    }
                }
                status
            })
            .collect();

        Ok(StoreStatus {
            dag_name: self.dag_name.clone(),
            last_run,
            locations,
        })
    }
}

fn latest_retry(records: &[CheckpointRecord], dag: &str, location: &str) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter(|r| r.type_id == EntityType::RETRY_ID && r.belongs_to(dag, location))
        .map(|r| r.timestamp)
        .max()
}

fn is_pending(record: &CheckpointRecord, since: Option<DateTime<Utc>>) -> bool {
    record.is_event() && since.is_none_or(|since| record.timestamp > since)
}

/// Pending retry events of one location, handed out as blobs in retry space.
///
/// Blob positions count events within this retry batch, not source offsets.
/// Each event keeps the original index it was recorded under.
#[derive(Debug, Clone)]
pub struct PendingRetries {
    location: String,
    events: std::vec::IntoIter<(u64, Event)>,
    page_size: usize,
    position: u64,
    total: usize,
}

impl PendingRetries {
    fn new(location: &str, events: Vec<(u64, Event)>, page_size: usize) -> Self {
        Self {
            location: location.to_string(),
            total: events.len(),
            events: events.into_iter(),
            page_size,
            position: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Iterator for PendingRetries {
    type Item = Blob;

    fn next(&mut self) -> Option<Blob> {
        let page: Vec<(u64, Event)> = self.events.by_ref().take(self.page_size).collect();
        if page.is_empty() {
            return None;
        }
        let blob = Blob::redelivery(self.location.clone(), self.position, page);
        self.position = blob.next_position();
        Some(blob)
    }
}

/// Summary of one DAG's checkpoint records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub dag_name: String,
    pub last_run: Option<DateTime<Utc>>,
    pub locations: Vec<LocationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationStatus {
    pub location: String,
    /// BLOB records
    pub blobs: usize,
    /// Sum of BLOB lengths
    pub rows: u64,
    /// Retriable EVENT records after the latest RETRY marker
    pub pending_retriable: usize,
    pub permanent_failures: usize,
    pub reports: usize,
    pub last_retry: Option<DateTime<Utc>>,
}

/// Error code of a raw EVENT `type_id`, for display.
pub fn event_code(type_id: i32) -> Option<ErrorCode> {
    match EntityType::from_type_id(type_id)? {
        EntityType::Event(code) => Some(code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use serde_json::json;

    fn ev(v: serde_json::Value) -> Event {
        v.as_object().cloned().unwrap()
    }

    fn memory_store() -> (CheckpointStore, MemoryLog) {
        let log = MemoryLog::new();
        let store = CheckpointStore::new(log.clone(), "daily")
            .with_append_retries(3, Duration::ZERO);
        (store, log)
    }

    fn failed_blob(location: &str, codes: &[ErrorCode]) -> Blob {
        let events = (0..codes.len()).map(|i| ev(json!({ "n": i }))).collect();
        let mut blob = Blob::new(location, 0, events);
        for (i, code) in codes.iter().enumerate() {
            blob.push_failed(i, *code);
        }
        blob
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let mut clock = MonotonicClock::default();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let t = clock.now();
            assert!(t > prev);
            prev = t;
        }
    }

    #[test]
    fn processed_ranges_sorted_and_scoped() {
        let (mut store, log) = memory_store();
        store.record_blob("a", 70, 10).unwrap();
        store.record_blob("a", 0, 50).unwrap();
        store.record_blob("b", 0, 5).unwrap();
        let mut other = CheckpointStore::new(log, "other");
        other.record_blob("a", 50, 20).unwrap();

        assert_eq!(
            store.processed_ranges("a").unwrap(),
            vec![ResumeRange::new(0, 50), ResumeRange::new(70, 10)]
        );
        assert!(store.processed_ranges("missing").unwrap().is_empty());
    }

    #[test]
    fn pending_retries_high_water_mark() {
        let (mut store, _) = memory_store();
        store
            .record_failed_events(&failed_blob("a", &[ErrorCode::ServerError, ErrorCode::Timeout]))
            .unwrap();

        let first: Vec<Blob> = store.pending_retries("a").unwrap().collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].events.len(), 2);
        assert_eq!(first[0].events[1]["n"], 1);

        let second = store.pending_retries("a").unwrap();
        assert!(second.is_empty());
        assert_eq!(second.count(), 0);
    }

    #[test]
    fn new_failures_after_marker_are_pending() {
        let (mut store, _) = memory_store();
        store
            .record_failed_events(&failed_blob("a", &[ErrorCode::RateLimited]))
            .unwrap();
        assert_eq!(store.pending_retries("a").unwrap().total(), 1);

        store
            .record_failed_events(&failed_blob("a", &[ErrorCode::ServerError]))
            .unwrap();
        assert_eq!(store.pending_retries("a").unwrap().total(), 1);
    }

    #[test]
    fn permanent_failures_never_pending() {
        let (mut store, _) = memory_store();
        store
            .record_failed_events(&failed_blob(
                "a",
                &[ErrorCode::InvalidPayload, ErrorCode::RejectedByDestination, ErrorCode::ServerError],
            ))
            .unwrap();
        let pending = store.pending_retries("a").unwrap();
        assert_eq!(pending.total(), 1);
    }

    #[test]
    fn re_recorded_failures_keep_original_index() {
        let (mut store, log) = memory_store();
        let mut blob = Blob::new("a", 40, (0..6).map(|i| ev(json!({ "n": i }))).collect());
        blob.push_failed(4, ErrorCode::ServerError);
        store.record_failed_events(&blob).unwrap();

        let mut retry: Vec<Blob> = store.pending_retries("a").unwrap().collect();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].original_index(0), 4);
        retry[0].push_failed(0, ErrorCode::Timeout);
        store.record_failed_events(&retry[0]).unwrap();

        let positions: Vec<Option<u64>> = log
            .records()
            .iter()
            .filter(|r| r.is_event())
            .map(|r| r.position_u64())
            .collect();
        assert_eq!(positions, vec![Some(4), Some(4)]);
        let again: Vec<Blob> = store.pending_retries("a").unwrap().collect();
        assert_eq!(again[0].original_index(0), 4);
        assert_eq!(again[0].events[0]["n"], 4);
    }

    #[test]
    fn retries_paged_by_page_size() {
        let (store, _) = memory_store();
        let mut store = store.with_page_size(2);
        store
            .record_failed_events(&failed_blob("a", &[ErrorCode::ServerError; 5]))
            .unwrap();
        let blobs: Vec<Blob> = store.pending_retries("a").unwrap().collect();
        let shape: Vec<(u64, usize)> = blobs.iter().map(|b| (b.position, b.length)).collect();
        assert_eq!(shape, vec![(0, 2), (2, 2), (4, 1)]);
    }

    #[test]
    fn retry_marker_is_per_location() {
        let (mut store, _) = memory_store();
        store
            .record_failed_events(&failed_blob("a", &[ErrorCode::ServerError]))
            .unwrap();
        store
            .record_failed_events(&failed_blob("b", &[ErrorCode::ServerError]))
            .unwrap();
        assert_eq!(store.pending_retries("a").unwrap().total(), 1);
        assert_eq!(store.pending_retries("b").unwrap().total(), 1);
    }

    #[test]
    fn append_retries_then_fails() {
        let (mut store, log) = memory_store();
        log.fail_next_appends(2);
        store.record_run().unwrap();
        assert_eq!(log.records().len(), 1);

        log.fail_next_appends(10);
        match store.record_blob("a", 0, 1) {
            Err(CheckpointError::AppendLog { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected append failure, got {other:?}"),
        }
    }

    #[test]
    fn cleanup_validates_and_prunes() {
        let (mut store, log) = memory_store();
        assert!(matches!(store.cleanup(0), Err(CheckpointError::InvalidConfig(_))));

        let old = Utc::now() - TimeDelta::days(30);
        log.push(CheckpointRecord {
            dag_name: "daily".into(),
            timestamp: old,
            type_id: EntityType::BLOB_ID,
            location: Some("a".into()),
            position: Some("0".into()),
            info: Some("10".into()),
        });
        log.push(CheckpointRecord {
            dag_name: "someone-else".into(),
            timestamp: old,
            type_id: EntityType::RUN_ID,
            location: None,
            position: None,
            info: None,
        });
        store.record_blob("a", 10, 10).unwrap();

        assert_eq!(store.cleanup(7).unwrap(), 1);
        assert_eq!(store.processed_ranges("a").unwrap(), vec![ResumeRange::new(10, 10)]);
        assert_eq!(log.records().len(), 2);
    }

    #[test]
    fn reports_deduplicated_by_response() {
        let (mut store, log) = memory_store();
        let mut blob = Blob::new("a", 0, vec![ev(json!({})); 3]);
        let shared: Arc<str> = Arc::from("{\"ok\":true}");
        for index in 0..3 {
            blob.reports.push(courier_core::DeliveryReport {
                index,
                outcome: courier_core::Outcome::Delivered,
                raw_response: if index == 2 { Some(Arc::from("other")) } else { Some(shared.clone()) },
            });
        }
        assert_eq!(store.record_reports(&blob).unwrap(), 2);
        assert_eq!(log.records().len(), 2);
    }

    #[test]
    fn status_summarizes_locations() {
        let (mut store, _) = memory_store();
        store.record_run().unwrap();
        store.record_blob("a", 0, 100).unwrap();
        store.record_blob("a", 100, 50).unwrap();
        store
            .record_failed_events(&failed_blob("a", &[ErrorCode::ServerError, ErrorCode::InvalidPayload]))
            .unwrap();

        let status = store.status().unwrap();
        assert!(status.last_run.is_some());
        assert_eq!(status.locations.len(), 1);
        let a = &status.locations[0];
        assert_eq!((a.blobs, a.rows), (2, 150));
        assert_eq!(a.pending_retriable, 1);
        assert_eq!(a.permanent_failures, 1);

        store.pending_retries("a").unwrap();
        assert_eq!(store.status().unwrap().locations[0].pending_retriable, 0);
    }

    #[test]
    fn jsonl_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.jsonl");
        {
            let mut store = CheckpointStore::open_jsonl(&path, "daily").unwrap();
            store.record_blob("a", 0, 30).unwrap();
            store
                .record_failed_events(&failed_blob("a", &[ErrorCode::Timeout]))
                .unwrap();
        }
        let mut store = CheckpointStore::open_jsonl(&path, "daily").unwrap();
        assert_eq!(store.processed_ranges("a").unwrap(), vec![ResumeRange::new(0, 30)]);
        assert_eq!(store.pending_retries("a").unwrap().total(), 1);
        assert_eq!(store.pending_retries("a").unwrap().total(), 0);
    }

    #[test]
    fn event_code_lookup() {
        assert_eq!(event_code(12), Some(ErrorCode::ServerError));
        assert_eq!(event_code(-2), None);
    }
}
