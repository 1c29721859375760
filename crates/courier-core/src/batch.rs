//! Greedy, order-preserving batching under count and byte limits

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ErrorCode;

/// Per-destination batching limits. `None` byte limits mean "unbounded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BatchLimits {
    pub max_count: usize,
    #[serde(default)]
    pub max_bytes_per_item: Option<usize>,
    #[serde(default)]
    pub max_bytes_per_batch: Option<usize>,
}

impl BatchLimits {
    /// Count-only limits.
    pub const fn count(max_count: usize) -> Self {
        Self {
            max_count,
            max_bytes_per_item: None,
            max_bytes_per_batch: None,
        }
    }

    pub fn validate(&self) -> Result<(), BatchConfigError> {
        if self.max_count == 0 {
            return Err(BatchConfigError::ZeroCount);
        }
        if self.max_bytes_per_item == Some(0) {
            return Err(BatchConfigError::ZeroItemBytes);
        }
        if self.max_bytes_per_batch == Some(0) {
            return Err(BatchConfigError::ZeroBatchBytes);
        }
        Ok(())
    }
}

/// Limits that can never admit an item. Rejects the whole call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchConfigError {
    ZeroCount,
    ZeroItemBytes,
    ZeroBatchBytes,
}

impl fmt::Display for BatchConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCount => write!(f, "max_count must be positive"),
            Self::ZeroItemBytes => write!(f, "max_bytes_per_item must be positive"),
            Self::ZeroBatchBytes => write!(f, "max_bytes_per_batch must be positive"),
        }
    }
}

impl std::error::Error for BatchConfigError {}

/// A validated payload tagged with its index in the source blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub index: usize,
    pub payload: Value,
    /// Wire size in bytes, as measured by the destination formatter
    pub size: usize,
}

/// Items sent to a destination in one call, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    items: Vec<BatchItem>,
    bytes: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: BatchItem) {
        self.bytes += item.size;
        self.items.push(item);
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of item wire sizes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Original blob indices, in batch order.
    pub fn indices(&self) -> Vec<usize> {
        self.items.iter().map(|i| i.index).collect()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().map(|i| &i.payload)
    }

    /// Batch restricted to the given original indices, order kept.
    pub fn subset(&self, indices: &BTreeSet<usize>) -> Batch {
        let mut out = Batch::new();
        for item in &self.items {
            if indices.contains(&item.index) {
                out.push(item.clone());
            }
        }
        out
    }

    fn fits(&self, item_size: usize, limits: &BatchLimits) -> bool {
        if self.items.len() + 1 > limits.max_count {
            return false;
        }
        match limits.max_bytes_per_batch {
            Some(max) => self.bytes + item_size <= max,
            None => true,
        }
    }
}

/// Result of [`batch`]: the batches plus items that can never be sent.
#[derive(Debug, Default)]
pub struct Batched {
    pub batches: Vec<Batch>,
    /// Items over a byte limit, with their rejection code
    pub rejected: Vec<(usize, ErrorCode)>,
}

/// Split indexed payloads into batches.
///
/// Consumes items in order, measuring each with `measure`. An item larger than
/// `max_bytes_per_item` or `max_bytes_per_batch` is rejected as
/// [`ErrorCode::PayloadTooLarge`]. Any
/// other item is appended to the open batch unless that would exceed
/// `max_count` or `max_bytes_per_batch`, in which case the open batch is
/// closed and a new one starts with the item.
pub fn batch(
    items: impl IntoIterator<Item = (usize, Value)>,
    limits: &BatchLimits,
    measure: impl Fn(&Value) -> usize,
) -> Result<Batched, BatchConfigError> {
    limits.validate()?;

    let mut out = Batched::default();
    let mut current = Batch::new();

    for (index, payload) in items {
        let size = measure(&payload);
        let over_item = limits.max_bytes_per_item.is_some_and(|max| size > max);
        let over_batch = limits.max_bytes_per_batch.is_some_and(|max| size > max);
        if over_item || over_batch {
            log::debug!("item {index}: {size} bytes can never be sent, rejecting");
            out.rejected.push((index, ErrorCode::PayloadTooLarge));
            continue;
        }
        if !current.is_empty() && !current.fits(size, limits) {
            out.batches.push(std::mem::take(&mut current));
        }
        current.push(BatchItem {
            index,
            payload,
            size,
        });
    }
    if !current.is_empty() {
        out.batches.push(current);
    }
    Ok(out)
}

/// Wire size of a payload serialized as compact JSON.
pub fn json_size(payload: &Value) -> usize {
    match payload {
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sized(n: usize, size: usize) -> Vec<(usize, Value)> {
        (0..n).map(|i| (i, Value::String("x".repeat(size)))).collect()
    }

    fn analytics_limits() -> BatchLimits {
        BatchLimits {
            max_count: 20,
            max_bytes_per_item: Some(8192),
            max_bytes_per_batch: Some(16384),
        }
    }

    #[test]
    fn empty_input_no_batches() {
        let out = batch(Vec::new(), &analytics_limits(), json_size).unwrap();
        assert!(out.batches.is_empty());
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn count_limit_splits() {
        let out = batch(sized(40, 100), &analytics_limits(), json_size).unwrap();
        assert_eq!(out.batches.len(), 2);
        assert!(out.batches.iter().all(|b| b.len() == 20));
    }

    #[test]
    fn byte_limit_splits() {
        let out = batch(sized(20, 4000), &analytics_limits(), json_size).unwrap();
        assert_eq!(out.batches.len(), 5);
        assert!(out.batches.iter().all(|b| b.bytes() <= 16384));
    }

    #[test]
    fn exact_fit_stays_in_batch() {
        let out = batch(sized(8, 4096), &analytics_limits(), json_size).unwrap();
        assert_eq!(out.batches.len(), 2);
        assert_eq!(out.batches[0].bytes(), 16384);
    }

    #[test]
    fn oversized_item_rejected_and_excluded() {
        let mut items = sized(3, 10);
        items[1].1 = Value::String("y".repeat(9000));
        let out = batch(items, &analytics_limits(), json_size).unwrap();
        assert_eq!(out.rejected, vec![(1, ErrorCode::PayloadTooLarge)]);
        assert_eq!(out.batches.len(), 1);
        assert_eq!(out.batches[0].indices(), vec![0, 2]);
    }

    #[test]
    fn item_over_batch_limit_rejected_without_item_limit() {
        let limits = BatchLimits {
            max_count: 10,
            max_bytes_per_item: None,
            max_bytes_per_batch: Some(100),
        };
        let mut items = sized(3, 10);
        items[2].1 = Value::String("y".repeat(101));
        let out = batch(items, &limits, json_size).unwrap();
        assert_eq!(out.rejected, vec![(2, ErrorCode::PayloadTooLarge)]);
        assert_eq!(out.batches.len(), 1);
        assert_eq!(out.batches[0].indices(), vec![0, 1]);
    }

    #[test]
    fn order_and_coverage_preserved() {
        let items: Vec<(usize, Value)> = (0..57)
            .map(|i| (i, Value::String("z".repeat(100 + (i * 37) % 900))))
            .collect();
        let limits = BatchLimits {
            max_count: 7,
            max_bytes_per_item: Some(950),
            max_bytes_per_batch: Some(2500),
        };
        let out = batch(items, &limits, json_size).unwrap();
        let mut seen: Vec<usize> = out.batches.iter().flat_map(|b| b.indices()).collect();
        seen.extend(out.rejected.iter().map(|(i, _)| *i));
        seen.sort_unstable();
        assert_eq!(seen, (0..57).collect::<Vec<_>>());

        let flat: Vec<usize> = out.batches.iter().flat_map(|b| b.indices()).collect();
        assert!(flat.windows(2).all(|w| w[0] < w[1]));
        for b in &out.batches {
            assert!(b.len() <= 7);
            assert!(b.bytes() <= 2500);
        }
    }

    #[test]
    fn count_only_limits() {
        let items = (0..2500).map(|i| (i, json!({ "i": i })));
        let out = batch(items, &BatchLimits::count(1000), json_size).unwrap();
        let sizes: Vec<usize> = out.batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn zero_limits_are_config_errors() {
        let err = batch(sized(1, 1), &BatchLimits::count(0), json_size).unwrap_err();
        assert_eq!(err, BatchConfigError::ZeroCount);

        let limits = BatchLimits {
            max_count: 5,
            max_bytes_per_item: Some(0),
            max_bytes_per_batch: None,
        };
        assert_eq!(
            batch(sized(1, 1), &limits, json_size).unwrap_err(),
            BatchConfigError::ZeroItemBytes
        );
    }

    #[test]
    fn subset_keeps_order() {
        let out = batch(sized(5, 1), &BatchLimits::count(10), json_size).unwrap();
        let keep: BTreeSet<usize> = [4, 1].into_iter().collect();
        let sub = out.batches[0].subset(&keep);
        assert_eq!(sub.indices(), vec![1, 4]);
        assert_eq!(sub.bytes(), 2);
    }
}
