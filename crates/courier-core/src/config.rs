//! Pipeline tuning shared by the reader, retry controller and orchestrator

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Explicit run configuration. Passed to components; never global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name under which checkpoint records are written
    pub dag_name: String,
    /// Source positions per read page
    pub page_size: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Concurrent calls for destinations without a batch endpoint
    pub fan_out_width: usize,
    /// Persist raw destination responses as REPORT records
    pub record_reports: bool,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dag_name: "courier".to_string(),
            page_size: 1000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: 1000,
            fan_out_width: 16,
            record_reports: false,
            http_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dag_name.trim().is_empty() {
            return Err(ConfigError("dag_name must not be empty"));
        }
        if self.page_size == 0 {
            return Err(ConfigError("page_size must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be at least 1"));
        }
        if self.fan_out_width == 0 {
            return Err(ConfigError("fan_out_width must be positive"));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError("http_timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Rejected [`Config`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError(pub &'static str);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pipeline config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}
