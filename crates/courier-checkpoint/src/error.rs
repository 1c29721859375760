use std::fmt;
use std::io;

/// Checkpoint store failures. Every variant is fatal for the current run.
#[derive(Debug)]
pub enum CheckpointError {
    /// Append kept failing after the bounded retries
    AppendLog { attempts: u32, source: io::Error },
    /// Reading or rewriting the backing storage failed
    Storage(io::Error),
    /// A persisted record could not be decoded
    Corrupt { line: usize, message: String },
    InvalidConfig(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppendLog { attempts, source } => {
                write!(f, "checkpoint append failed after {attempts} attempts: {source}")
            }
            Self::Storage(e) => write!(f, "checkpoint storage error: {e}"),
            Self::Corrupt { line, message } => {
                write!(f, "corrupt checkpoint record at line {line}: {message}")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid checkpoint config: {msg}"),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AppendLog { source, .. } => Some(source),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        Self::Storage(e)
    }
}
