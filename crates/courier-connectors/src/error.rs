use std::fmt;

use courier_core::BatchConfigError;

/// Connector construction failures.
#[derive(Debug)]
pub enum ConnectorError {
    InvalidConfig(String),
    Limits(BatchConfigError),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid connector config: {msg}"),
            Self::Limits(e) => write!(f, "invalid batch limits: {e}"),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<BatchConfigError> for ConnectorError {
    fn from(e: BatchConfigError) -> Self {
        Self::Limits(e)
    }
}
