//! Event and Blob model

use std::sync::Arc;

use crate::error::ErrorCode;

/// One record read from a source. Field order is the source order
/// (`serde_json` is built with `preserve_order`).
pub type Event = serde_json::Map<String, serde_json::Value>;

/// Final delivery outcome of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Failed(ErrorCode),
}

impl Outcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }

    pub fn error_code(self) -> Option<ErrorCode> {
        match self {
            Self::Delivered => None,
            Self::Failed(code) => Some(code),
        }
    }
}

/// An event that did not reach the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    /// Index within the owning [`Blob`], not within any batch
    pub index: usize,
    pub event: Event,
    pub code: ErrorCode,
}

/// Per-event delivery report kept for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub index: usize,
    pub outcome: Outcome,
    /// Raw destination response of the attempt that settled this event
    pub raw_response: Option<Arc<str>>,
}

/// A positioned slice of events pulled from one source in one read.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub events: Vec<Event>,
    /// Stable identifier of the source (file path, table URL)
    pub location: String,
    /// Source-relative offset of the first event
    pub position: u64,
    /// Number of source positions this blob covers
    pub length: usize,
    pub failed_events: Vec<FailedEvent>,
    pub reports: Vec<DeliveryReport>,
    /// Index each event had in the blob it was first read in. Empty for
    /// blobs read from a source, where that is the event's own index.
    pub original_indices: Vec<u64>,
}

impl Blob {
    pub fn new(location: impl Into<String>, position: u64, events: Vec<Event>) -> Self {
        Self {
            length: events.len(),
            events,
            location: location.into(),
            position,
            failed_events: Vec::new(),
            reports: Vec::new(),
            original_indices: Vec::new(),
        }
    }

    /// Blob of previously failed events, each paired with its original index.
    pub fn redelivery(
        location: impl Into<String>,
        position: u64,
        events: impl IntoIterator<Item = (u64, Event)>,
    ) -> Self {
        let (original_indices, events): (Vec<u64>, Vec<Event>) = events.into_iter().unzip();
        Self {
            original_indices,
            ..Self::new(location, position, events)
        }
    }

    /// Position right after this blob.
    pub fn next_position(&self) -> u64 {
        self.position + self.length as u64
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn indexed_events(&self) -> impl Iterator<Item = (usize, &Event)> {
        self.events.iter().enumerate()
    }

    /// Index the event at `index` had when it was first read.
    pub fn original_index(&self, index: usize) -> u64 {
        self.original_indices
            .get(index)
            .copied()
            .unwrap_or(index as u64)
    }

    /// Record a failure for the event at `index`. Out-of-range indices are ignored.
    pub fn push_failed(&mut self, index: usize, code: ErrorCode) {
        if let Some(event) = self.events.get(index) {
            self.failed_events.push(FailedEvent {
                index,
                event: event.clone(),
                code,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: i64) -> Event {
        match json!({ "id": id, "name": format!("e{id}") }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn next_position_uses_length() {
        let blob = Blob::new("t", 5, vec![event(1), event(2)]);
        assert_eq!(blob.length, 2);
        assert_eq!(blob.next_position(), 7);
    }

    #[test]
    fn push_failed_keeps_absolute_index() {
        let mut blob = Blob::new("t", 100, vec![event(0), event(1), event(2)]);
        blob.push_failed(2, ErrorCode::ServerError);
        blob.push_failed(0, ErrorCode::InvalidPayload);
        blob.push_failed(9, ErrorCode::InvalidPayload);
        assert_eq!(blob.failed_events.len(), 2);
        assert_eq!(blob.failed_events[0].index, 2);
        assert_eq!(blob.failed_events[0].event["id"], 2);
    }

    #[test]
    fn redelivery_keeps_original_indices() {
        let blob = Blob::redelivery("t", 0, [(7, event(7)), (2, event(12))]);
        assert_eq!(blob.length, 2);
        assert_eq!(blob.original_index(0), 7);
        assert_eq!(blob.original_index(1), 2);
        assert_eq!(Blob::new("t", 40, vec![event(0)]).original_index(0), 0);
    }

    #[test]
    fn event_preserves_field_order() {
        let e: Event = serde_json::from_str(r#"{"z":1,"a":2,"m":3}"#).unwrap();
        let keys: Vec<&str> = e.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn outcome_helpers() {
        assert!(Outcome::Delivered.is_delivered());
        assert_eq!(
            Outcome::Failed(ErrorCode::Timeout).error_code(),
            Some(ErrorCode::Timeout)
        );
    }
}
