use std::fmt;

use courier_checkpoint::CheckpointError;
use courier_core::{ErrorCode, SendError, SourceError};

/// Failures that end a run early.
#[derive(Debug)]
pub enum PipelineError {
    /// The source could not be opened (size probe, missing file, bad URL)
    DataInConnector {
        location: String,
        source: SourceError,
    },
    /// Destination rejected the credentials; remaining batches were not sent
    Authentication(String),
    /// Batch-level send failure that escaped the retry controller
    Delivery { code: ErrorCode, message: String },
    Checkpoint(CheckpointError),
    Configuration(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataInConnector { location, source } => {
                write!(f, "cannot read {location}: {source}")
            }
            Self::Authentication(msg) => write!(f, "destination authentication failed: {msg}"),
            Self::Delivery { code, message } => write!(f, "delivery failed with {code}: {message}"),
            Self::Checkpoint(e) => write!(f, "{e}"),
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DataInConnector { source, .. } => Some(source),
            Self::Checkpoint(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CheckpointError> for PipelineError {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e)
    }
}

impl From<SendError> for PipelineError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Authentication(msg) => Self::Authentication(msg),
            SendError::Batch { code, message } => Self::Delivery { code, message },
        }
    }
}

impl PipelineError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}
