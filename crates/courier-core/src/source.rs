//! Input connector contract and the resumable blob reader.
//!
//! A [`PagedSource`] knows how to report its size and fetch a span of
//! events. [`BlobReader`] walks the source in fixed-size pages, skipping
//! spans already recorded as processed, and yields one [`Blob`] per fetched
//! span. Its position lives in an explicit [`ReadCursor`] that can be
//! serialized and resumed.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{Blob, Event};
use crate::http::HttpError;

/// A `(position, length)` span of source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResumeRange {
    pub position: u64,
    pub length: u64,
}

impl ResumeRange {
    pub const fn new(position: u64, length: u64) -> Self {
        Self { position, length }
    }

    pub const fn end(&self) -> u64 {
        self.position + self.length
    }
}

/// Errors raised by input connectors.
#[derive(Debug)]
pub enum SourceError {
    Io(std::io::Error),
    Http(HttpError),
    /// Source answered but the response was not usable
    Format(String),
    /// Reader misconfiguration (e.g. zero page size)
    Config(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Http(e) => write!(f, "{e}"),
            Self::Format(msg) => write!(f, "unexpected source data: {msg}"),
            Self::Config(msg) => write!(f, "invalid reader config: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HttpError> for SourceError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

/// A paginated or chunked data source.
pub trait PagedSource {
    /// Stable identifier used as the checkpoint location.
    fn location(&self) -> &str;

    /// Total number of positions in the source.
    fn total_len(&mut self) -> Result<u64, SourceError>;

    /// Events in `[position, position + len)`. May return fewer than `len`.
    fn fetch(&mut self, position: u64, len: usize) -> Result<Vec<Event>, SourceError>;
}

impl<S: PagedSource + ?Sized> PagedSource for Box<S> {
    fn location(&self) -> &str {
        (**self).location()
    }

    fn total_len(&mut self) -> Result<u64, SourceError> {
        (**self).total_len()
    }

    fn fetch(&mut self, position: u64, len: usize) -> Result<Vec<Event>, SourceError> {
        (**self).fetch(position, len)
    }
}

/// Explicit read position of a [`BlobReader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursor {
    pub total: u64,
    pub page_size: u64,
    /// Start of the next page not yet split into spans
    pub next_page: u64,
    /// Unfetched spans of the current page
    pub pending: VecDeque<ResumeRange>,
    /// Already-processed spans, sorted and merged
    pub processed: Vec<ResumeRange>,
}

impl ReadCursor {
    pub fn new(total: u64, page_size: u64, processed: &[ResumeRange]) -> Self {
        Self {
            total,
            page_size,
            next_page: 0,
            pending: VecDeque::new(),
            processed: merge_ranges(processed),
        }
    }

    /// Whether every span has been handed out.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.next_page >= self.total
    }

    /// Next span to fetch, splitting pages around processed ranges.
    pub fn next_span(&mut self) -> Option<ResumeRange> {
        loop {
            if let Some(span) = self.pending.pop_front() {
                return Some(span);
            }
            if self.next_page >= self.total {
                return None;
            }
            let start = self.next_page;
            let end = (start + self.page_size).min(self.total);
            self.next_page = end;
            self.pending = uncovered(start, end, &self.processed);
            if self.pending.is_empty() {
                log::debug!("page [{start}, {end}) already processed, skipping");
            }
        }
    }
}

/// Sort ranges and coalesce overlapping or adjacent ones. Empty ranges are dropped.
pub fn merge_ranges(ranges: &[ResumeRange]) -> Vec<ResumeRange> {
    let mut sorted: Vec<ResumeRange> = ranges.iter().copied().filter(|r| r.length > 0).collect();
    sorted.sort();
    let mut merged: Vec<ResumeRange> = Vec::with_capacity(sorted.len());
    for r in sorted {
        match merged.last_mut() {
            Some(last) if r.position <= last.end() => {
                let end = last.end().max(r.end());
                last.length = end - last.position;
            }
            _ => merged.push(r),
        }
    }
    merged
}

/// Parts of `[start, end)` not covered by `processed` (sorted, merged).
fn uncovered(start: u64, end: u64, processed: &[ResumeRange]) -> VecDeque<ResumeRange> {
    let mut out = VecDeque::new();
    let mut cur = start;
    for r in processed {
        if r.end() <= cur {
            continue;
        }
        if r.position >= end {
            break;
        }
        if r.position > cur {
            out.push_back(ResumeRange::new(cur, r.position - cur));
        }
        cur = cur.max(r.end());
        if cur >= end {
            break;
        }
    }
    if cur < end {
        out.push_back(ResumeRange::new(cur, end - cur));
    }
    out
}

/// Lazy, resumable sequence of blobs over a [`PagedSource`].
///
/// A page fetch error skips that span (callers see a gap in coverage, not an
/// error). Only opening the reader, which must establish the source size, is
/// fatal.
pub struct BlobReader<S> {
    source: S,
    cursor: ReadCursor,
    gaps: Vec<ResumeRange>,
}

impl<S: PagedSource> BlobReader<S> {
    /// Probe the source size and position the reader at the start.
    pub fn open(mut source: S, page_size: usize, processed: &[ResumeRange]) -> Result<Self, SourceError> {
        if page_size == 0 {
            return Err(SourceError::Config("page_size must be positive".into()));
        }
        let total = source.total_len()?;
        log::debug!(
            "{}: {total} positions, {} processed ranges",
            source.location(),
            processed.len()
        );
        Ok(Self {
            source,
            cursor: ReadCursor::new(total, page_size as u64, processed),
            gaps: Vec::new(),
        })
    }

    /// Continue from a previously saved cursor.
    pub fn resume(source: S, cursor: ReadCursor) -> Self {
        Self {
            source,
            cursor,
            gaps: Vec::new(),
        }
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    pub fn location(&self) -> &str {
        self.source.location()
    }

    /// Spans skipped because their fetch failed.
    pub fn gaps(&self) -> &[ResumeRange] {
        &self.gaps
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

impl<S: PagedSource> Iterator for BlobReader<S> {
    type Item = Blob;

    fn next(&mut self) -> Option<Blob> {
        loop {
            let span = self.cursor.next_span()?;
            match self.source.fetch(span.position, span.length as usize) {
                Ok(events) if events.is_empty() => {
                    log::warn!(
                        "{}: no data for [{}, {}), skipping",
                        self.source.location(),
                        span.position,
                        span.end()
                    );
                    self.gaps.push(span);
                }
                Ok(mut events) => {
                    events.truncate(span.length as usize);
                    let read = events.len() as u64;
                    if read < span.length {
                        // short page: the rest of the span is fetched next
                        self.cursor
                            .pending
                            .push_front(ResumeRange::new(span.position + read, span.length - read));
                    }
                    return Some(Blob::new(self.source.location(), span.position, events));
                }
                Err(e) => {
                    log::warn!(
                        "{}: skipping [{}, {}): {e}",
                        self.source.location(),
                        span.position,
                        span.end()
                    );
                    self.gaps.push(span);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// In-memory source recording every fetch.
    struct VecSource {
        len: u64,
        fetches: Vec<(u64, usize)>,
        fail_at: Option<u64>,
        fail_size: bool,
        /// Most rows one fetch returns
        cap: usize,
    }

    impl VecSource {
        fn new(len: u64) -> Self {
            Self {
                len,
                fetches: Vec::new(),
                fail_at: None,
                fail_size: false,
                cap: usize::MAX,
            }
        }
    }

    impl PagedSource for VecSource {
        fn location(&self) -> &str {
            "mem://table"
        }

        fn total_len(&mut self) -> Result<u64, SourceError> {
            if self.fail_size {
                return Err(SourceError::Format("unreachable".into()));
            }
            Ok(self.len)
        }

        fn fetch(&mut self, position: u64, len: usize) -> Result<Vec<Event>, SourceError> {
            self.fetches.push((position, len));
            if self.fail_at == Some(position) {
                return Err(SourceError::Io(std::io::Error::other("flaky")));
            }
            let end = (position + len.min(self.cap) as u64).min(self.len);
            Ok((position..end)
                .map(|i| json!({ "i": i }).as_object().cloned().unwrap())
                .collect())
        }
    }

    fn fetched_positions(blobs: &[Blob]) -> Vec<u64> {
        blobs
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e["i"].as_u64().unwrap()))
            .collect()
    }

    #[test]
    fn full_read_in_pages() {
        let mut reader = BlobReader::open(VecSource::new(100), 30, &[]).unwrap();
        let blobs: Vec<Blob> = reader.by_ref().collect();
        assert_eq!(blobs.len(), 4);
        assert_eq!(blobs[3].position, 90);
        assert_eq!(blobs[3].length, 10);
        assert_eq!(fetched_positions(&blobs), (0..100).collect::<Vec<_>>());
        assert!(reader.cursor().is_finished());
    }

    #[test]
    fn resume_skips_processed_ranges() {
        let processed = [ResumeRange::new(0, 50), ResumeRange::new(70, 10)];
        let mut reader = BlobReader::open(VecSource::new(100), 30, &processed).unwrap();
        let blobs: Vec<Blob> = reader.by_ref().collect();

        let expected: Vec<u64> = (50..70).chain(80..100).collect();
        assert_eq!(fetched_positions(&blobs), expected);

        let source = reader.into_source();
        assert_eq!(source.fetches, vec![(50, 10), (60, 10), (80, 10), (90, 10)]);
    }

    #[test]
    fn ranges_emitted_are_increasing_and_disjoint() {
        let processed = [ResumeRange::new(5, 3), ResumeRange::new(40, 25)];
        let blobs: Vec<Blob> = BlobReader::open(VecSource::new(77), 16, &processed)
            .unwrap()
            .collect();
        for pair in blobs.windows(2) {
            assert!(pair[0].next_position() <= pair[1].position);
        }
        let covered: u64 = blobs.iter().map(|b| b.length as u64).sum();
        assert_eq!(covered, 77 - 3 - 25);
    }

    #[test]
    fn fetch_error_leaves_gap() {
        let mut source = VecSource::new(60);
        source.fail_at = Some(20);
        let mut reader = BlobReader::open(source, 20, &[]).unwrap();
        let blobs: Vec<Blob> = reader.by_ref().collect();
        assert_eq!(blobs.len(), 2);
        assert_eq!(reader.gaps(), &[ResumeRange::new(20, 20)]);
        assert_eq!(blobs[1].position, 40);
    }

    #[test]
    fn short_pages_are_read_to_the_end() {
        let mut source = VecSource::new(30);
        source.cap = 10;
        let mut reader = BlobReader::open(source, 30, &[]).unwrap();
        let blobs: Vec<Blob> = reader.by_ref().collect();

        let shape: Vec<(u64, usize)> = blobs.iter().map(|b| (b.position, b.length)).collect();
        assert_eq!(shape, vec![(0, 10), (10, 10), (20, 10)]);
        assert_eq!(fetched_positions(&blobs), (0..30).collect::<Vec<_>>());
        assert!(reader.gaps().is_empty());
        assert_eq!(reader.into_source().fetches, vec![(0, 30), (10, 20), (20, 10)]);
    }

    #[test]
    fn empty_page_is_a_gap() {
        let mut source = VecSource::new(15);
        source.cap = 0;
        let mut reader = BlobReader::open(source, 10, &[]).unwrap();
        assert_eq!(reader.by_ref().count(), 0);
        assert_eq!(
            reader.gaps(),
            &[ResumeRange::new(0, 10), ResumeRange::new(10, 5)]
        );
    }

    #[test]
    fn size_probe_failure_is_fatal() {
        let mut source = VecSource::new(10);
        source.fail_size = true;
        assert!(BlobReader::open(source, 5, &[]).is_err());
    }

    #[test]
    fn zero_page_size_rejected() {
        assert!(matches!(
            BlobReader::open(VecSource::new(10), 0, &[]),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn cursor_resume_continues_where_left() {
        let mut reader = BlobReader::open(VecSource::new(50), 10, &[]).unwrap();
        let first = reader.next().unwrap();
        assert_eq!(first.position, 0);
        let saved = serde_json::to_string(reader.cursor()).unwrap();

        let cursor: ReadCursor = serde_json::from_str(&saved).unwrap();
        let rest: Vec<Blob> = BlobReader::resume(VecSource::new(50), cursor).collect();
        assert_eq!(rest.len(), 4);
        assert_eq!(rest[0].position, 10);
    }

    #[test]
    fn merge_coalesces_adjacent_and_overlapping() {
        let merged = merge_ranges(&[
            ResumeRange::new(10, 5),
            ResumeRange::new(0, 10),
            ResumeRange::new(12, 10),
            ResumeRange::new(40, 0),
            ResumeRange::new(30, 2),
        ]);
        assert_eq!(merged, vec![ResumeRange::new(0, 22), ResumeRange::new(30, 2)]);
    }

    #[test]
    fn fully_processed_source_yields_nothing() {
        let blobs: Vec<Blob> = BlobReader::open(VecSource::new(40), 10, &[ResumeRange::new(0, 40)])
            .unwrap()
            .collect();
        assert!(blobs.is_empty());
    }
}
