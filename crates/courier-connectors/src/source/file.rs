//! Newline-delimited JSON files, optionally gzip-compressed

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use courier_core::{Event, PagedSource, SourceError, UNPARSED_FIELD};
use flate2::read::MultiGzDecoder;
use serde_json::Value;

/// Buffer size for file readers (256KB)
const READ_BUF_SIZE: usize = 256 * 1024;

/// Records between remembered byte offsets of a plain file.
const INDEX_EVERY: u64 = 1024;

type RecordReader = BufReader<Box<dyn Read + Send>>;

/// Open reader and the index of the record it yields next.
struct ReadHead {
    reader: RecordReader,
    next: u64,
}

/// One NDJSON file. Position is the index of a non-blank line.
///
/// The size probe streams the file once, keeping only a sparse offset index
/// for plain files. Fetches stream forward from the closest indexed offset
/// (plain) or from the current read head (gzip, reopened when asked to go
/// back).
pub struct NdjsonFileSource {
    path: PathBuf,
    location: String,
    total: Option<u64>,
    /// Byte offset of every `INDEX_EVERY`th record; empty for gzip
    offsets: Vec<u64>,
    head: Option<ReadHead>,
    line: Vec<u8>,
}

impl NdjsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let location = path.display().to_string();
        Self {
            path,
            location,
            total: None,
            offsets: Vec::new(),
            head: None,
            line: Vec::new(),
        }
    }

    /// One source per file matching `pattern`, in path order.
    pub fn discover(pattern: &str) -> Result<Vec<Self>, SourceError> {
        let paths = glob::glob(pattern)
            .map_err(|e| SourceError::Config(format!("bad glob pattern {pattern:?}: {e}")))?;
        let mut files: Vec<PathBuf> = paths
            .filter_map(|entry| match entry {
                Ok(p) if p.is_file() => Some(p),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("skipping unreadable match: {e}");
                    None
                }
            })
            .collect();
        files.sort();
        log::debug!("{pattern}: {} files", files.len());
        Ok(files.into_iter().map(Self::new).collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_gzip(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "gz")
    }

    /// Reader starting at byte `offset` of the decoded stream. Gzip readers
    /// only start at 0.
    fn open_at(&self, offset: u64) -> Result<RecordReader, SourceError> {
        let mut file = File::open(&self.path)?;
        let inner: Box<dyn Read + Send> = if self.is_gzip() {
            Box::new(MultiGzDecoder::new(file))
        } else {
            file.seek(SeekFrom::Start(offset))?;
            Box::new(file)
        };
        Ok(BufReader::with_capacity(READ_BUF_SIZE, inner))
    }

    /// Count records in one pass, remembering sparse offsets.
    fn scan(&mut self) -> Result<u64, SourceError> {
        let mut reader = self.open_at(0)?;
        let index = !self.is_gzip();
        let mut offset = 0u64;
        let mut records = 0u64;
        self.offsets.clear();
        loop {
            self.line.clear();
            let n = reader.read_until(b'\n', &mut self.line)?;
            if n == 0 {
                break;
            }
            if !self.line.trim_ascii().is_empty() {
                if index && records % INDEX_EVERY == 0 {
                    self.offsets.push(offset);
                }
                records += 1;
            }
            offset += n as u64;
        }
        log::debug!("{}: {records} records", self.location);
        Ok(records)
    }

    /// Read head positioned at or before record `position`.
    fn head_at(&mut self, position: u64) -> Result<ReadHead, SourceError> {
        let slot = (position / INDEX_EVERY) as usize;
        let indexed = self
            .offsets
            .get(slot)
            .map(|&offset| (slot as u64 * INDEX_EVERY, offset));
        if let Some(head) = self.head.take() {
            let index_is_closer = indexed.is_some_and(|(record, _)| record > head.next);
            if head.next <= position && !index_is_closer {
                return Ok(head);
            }
        }
        let (next, offset) = indexed.unwrap_or((0, 0));
        Ok(ReadHead {
            reader: self.open_at(offset)?,
            next,
        })
    }
}

/// Read the next non-blank line into `line`. `false` at end of input.
fn next_record(reader: &mut RecordReader, line: &mut Vec<u8>) -> std::io::Result<bool> {
    loop {
        line.clear();
        if reader.read_until(b'\n', line)? == 0 {
            return Ok(false);
        }
        if !line.trim_ascii().is_empty() {
            return Ok(true);
        }
    }
}

impl PagedSource for NdjsonFileSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn total_len(&mut self) -> Result<u64, SourceError> {
        match self.total {
            Some(total) => Ok(total),
            None => {
                let total = self.scan()?;
                self.total = Some(total);
                Ok(total)
            }
        }
    }

    fn fetch(&mut self, position: u64, len: usize) -> Result<Vec<Event>, SourceError> {
        let end = position
            .saturating_add(len as u64)
            .min(self.total_len()?);
        if position >= end {
            return Ok(Vec::new());
        }

        let mut head = self.head_at(position)?;
        let mut events = Vec::with_capacity((end - position) as usize);
        while head.next < end {
            if !next_record(&mut head.reader, &mut self.line)? {
                break;
            }
            if head.next >= position {
                let text = String::from_utf8_lossy(&self.line);
                events.push(parse_line(text.trim_end()));
            }
            head.next += 1;
        }
        self.head = Some(head);
        Ok(events)
    }
}

/// Parse one record; anything but a JSON object is kept raw under
/// [`UNPARSED_FIELD`] so validation can reject it with its index.
pub(crate) fn parse_line(line: &str) -> Event {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        _ => unparsed(line.to_string()),
    }
}

pub(crate) fn unparsed(raw: String) -> Event {
    let mut event = Event::new();
    event.insert(UNPARSED_FIELD.to_string(), Value::String(raw));
    event
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use courier_core::BlobReader;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut f = File::create(path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
    }

    #[test]
    fn reads_lines_and_skips_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        write_lines(&path, &[r#"{"id":1}"#, "", r#"{"id":2}"#, "   ", r#"{"id":3}"#]);

        let mut source = NdjsonFileSource::new(&path);
        assert_eq!(source.total_len().unwrap(), 3);
        let events = source.fetch(1, 5).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["id"], 2);
        assert!(source.fetch(10, 5).unwrap().is_empty());
    }

    #[test]
    fn unparsable_lines_are_marked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        write_lines(&path, &[r#"{"id":1}"#, "{not json", "[1,2]"]);

        let events = NdjsonFileSource::new(&path).fetch(0, 3).unwrap();
        assert!(!events[0].contains_key(UNPARSED_FIELD));
        assert_eq!(events[1][UNPARSED_FIELD], "{not json");
        assert_eq!(events[2][UNPARSED_FIELD], "[1,2]");
    }

    #[test]
    fn reads_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        for i in 0..25 {
            writeln!(enc, r#"{{"id":{i}}}"#).unwrap();
        }
        enc.finish().unwrap();

        let blobs: Vec<_> = BlobReader::open(NdjsonFileSource::new(&path), 10, &[])
            .unwrap()
            .collect();
        assert_eq!(blobs.len(), 3);
        assert_eq!(blobs[2].events.len(), 5);
        assert_eq!(blobs[2].events[4]["id"], 24);
    }

    #[test]
    fn fetches_out_of_order_across_index_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut f = File::create(&path).unwrap();
        for i in 0..3000 {
            if i % 500 == 0 {
                writeln!(f).unwrap();
            }
            writeln!(f, r#"{{"id":{i}}}"#).unwrap();
        }
        drop(f);

        let mut source = NdjsonFileSource::new(&path);
        assert_eq!(source.total_len().unwrap(), 3000);
        assert_eq!(source.offsets.len(), 3);

        for position in [2500, 1030, 10, 2048] {
            let events = source.fetch(position, 3).unwrap();
            let ids: Vec<u64> = events.iter().map(|e| e["id"].as_u64().unwrap()).collect();
            assert_eq!(ids, vec![position, position + 1, position + 2]);
        }
        assert_eq!(source.fetch(2998, 10).unwrap().len(), 2);
    }

    #[test]
    fn gzip_reopens_to_go_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        for i in 0..50 {
            writeln!(enc, r#"{{"id":{i}}}"#).unwrap();
        }
        enc.finish().unwrap();

        let mut source = NdjsonFileSource::new(&path);
        assert_eq!(source.total_len().unwrap(), 50);
        assert!(source.offsets.is_empty());
        assert_eq!(source.fetch(40, 5).unwrap()[0]["id"], 40);
        assert_eq!(source.fetch(5, 1).unwrap()[0]["id"], 5);
        assert_eq!(source.fetch(45, 5).unwrap()[4]["id"], 49);
    }

    #[test]
    fn missing_file_fails_open() {
        let source = NdjsonFileSource::new("/nonexistent/events.ndjson");
        assert!(matches!(
            BlobReader::open(source, 10, &[]),
            Err(SourceError::Io(_))
        ));
    }

    #[test]
    fn discover_matches_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.ndjson", "a.ndjson", "skip.txt"] {
            write_lines(&dir.path().join(name), &["{}"]);
        }
        let pattern = format!("{}/*.ndjson", dir.path().display());
        let sources = NdjsonFileSource::discover(&pattern).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|s| s.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.ndjson", "b.ndjson"]);
        assert!(NdjsonFileSource::discover("[").is_err());
    }
}
