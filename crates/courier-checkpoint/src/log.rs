//! Append-only storage backends for checkpoint records

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::CheckpointError;
use crate::record::CheckpointRecord;

/// Storage behind a [`CheckpointStore`](crate::CheckpointStore).
///
/// `append` returns the raw I/O error so the store can retry it; records are
/// never modified in place, only dropped wholesale by `retain`.
pub trait AppendLog: Send {
    fn append(&mut self, record: &CheckpointRecord) -> io::Result<()>;

    /// All records in append order.
    fn scan(&self) -> Result<Vec<CheckpointRecord>, CheckpointError>;

    /// Keep only records matching `keep`. Returns how many were removed.
    fn retain(&mut self, keep: &dyn Fn(&CheckpointRecord) -> bool)
        -> Result<usize, CheckpointError>;
}

/// One JSON record per line in a local file.
///
/// Each append is a single `O_APPEND` write, so several processes can share
/// one file. A torn final line (crash mid-write) is skipped on scan.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    /// Open (or lazily create) the log at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl AppendLog for JsonlLog {
    fn append(&mut self, record: &CheckpointRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()
    }

    fn scan(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<String> = BufReader::new(file).lines().collect::<io::Result<_>>()?;
        let last = lines.len();

        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) if i + 1 == last => {
                    log::warn!(
                        "{}: ignoring torn final record: {e}",
                        self.path.display()
                    );
                }
                Err(e) => {
                    return Err(CheckpointError::Corrupt {
                        line: i + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(records)
    }

    fn retain(
        &mut self,
        keep: &dyn Fn(&CheckpointRecord) -> bool,
    ) -> Result<usize, CheckpointError> {
        let records = self.scan()?;
        let before = records.len();
        let tmp = self.tmp_path();
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records.iter().filter(|r| keep(r)) {
                serde_json::to_writer(&mut out, record).map_err(io::Error::other)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let after = self.scan()?.len();
        Ok(before - after)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<CheckpointRecord>,
    failing_appends: u32,
}

/// In-memory log for tests and dry runs. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record.
    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.lock().records.clone()
    }

    /// Insert a record as-is, bypassing the store clock.
    pub fn push(&self, record: CheckpointRecord) {
        self.lock().records.push(record);
    }

    /// Make the next `n` appends fail with a transient error.
    pub fn fail_next_appends(&self, n: u32) {
        self.lock().failing_appends = n;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AppendLog for MemoryLog {
    fn append(&mut self, record: &CheckpointRecord) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.failing_appends > 0 {
            inner.failing_appends -= 1;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "injected failure"));
        }
        inner.records.push(record.clone());
        Ok(())
    }

    fn scan(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(self.records())
    }

    fn retain(
        &mut self,
        keep: &dyn Fn(&CheckpointRecord) -> bool,
    ) -> Result<usize, CheckpointError> {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|r| keep(r));
        Ok(before - inner.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(type_id: i32, pos: u64) -> CheckpointRecord {
        CheckpointRecord {
            dag_name: "d".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            type_id,
            location: Some("loc".into()),
            position: Some(pos.to_string()),
            info: None,
        }
    }

    #[test]
    fn jsonl_append_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = JsonlLog::open(dir.path().join("nested/checkpoint.jsonl")).unwrap();
        assert!(log.scan().unwrap().is_empty());

        log.append(&record(-2, 0)).unwrap();
        log.append(&record(-2, 10)).unwrap();
        let records = log.scan().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].position_u64(), Some(10));
    }

    #[test]
    fn jsonl_skips_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.jsonl");
        let mut log = JsonlLog::open(&path).unwrap();
        log.append(&record(-1, 0)).unwrap();
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"dag_name":"d","timest"#).unwrap();

        assert_eq!(log.scan().unwrap().len(), 1);
    }

    #[test]
    fn jsonl_corrupt_middle_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.jsonl");
        let good = serde_json::to_string(&record(-1, 0)).unwrap();
        fs::write(&path, format!("{good}\nnot json\n{good}\n")).unwrap();

        let log = JsonlLog::open(&path).unwrap();
        assert!(matches!(
            log.scan(),
            Err(CheckpointError::Corrupt { line: 2, .. })
        ));
    }

    #[test]
    fn jsonl_retain_rewrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = JsonlLog::open(dir.path().join("c.jsonl")).unwrap();
        for pos in 0..5 {
            log.append(&record(-2, pos)).unwrap();
        }
        let removed = log.retain(&|r| r.position_u64() >= Some(3)).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(log.scan().unwrap().len(), 2);
        assert!(!log.tmp_path().exists());
    }

    #[test]
    fn memory_log_shares_state_and_injects_failures() {
        let handle = MemoryLog::new();
        let mut log = handle.clone();
        handle.fail_next_appends(1);
        assert!(log.append(&record(-1, 0)).is_err());
        log.append(&record(-1, 0)).unwrap();
        assert_eq!(handle.records().len(), 1);
    }
}
