//! Output connectors

mod batch_endpoint;
mod partial;
mod per_item;

pub use batch_endpoint::{BatchEndpointSink, BodyFormat};
pub use partial::parse_partial_failure;
pub use per_item::PerItemSink;

use courier_core::{BatchLimits, Config, Sink};
use serde::Deserialize;

use crate::destination::{Destination, Transport};
use crate::error::ConnectorError;

/// `[sink]` section: destination class, endpoint, credentials and optional
/// limit overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SinkSettings {
    #[serde(flatten)]
    pub destination: Destination,
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub max_count: Option<usize>,
    #[serde(default)]
    pub max_bytes_per_item: Option<usize>,
    #[serde(default)]
    pub max_bytes_per_batch: Option<usize>,
}

impl SinkSettings {
    /// Destination defaults with configured overrides applied.
    pub fn limits(&self) -> BatchLimits {
        let defaults = self.destination.default_limits();
        BatchLimits {
            max_count: self.max_count.unwrap_or(defaults.max_count),
            max_bytes_per_item: self.max_bytes_per_item.or(defaults.max_bytes_per_item),
            max_bytes_per_batch: self.max_bytes_per_batch.or(defaults.max_bytes_per_batch),
        }
    }

    pub fn build(&self, config: &Config) -> Result<Box<dyn Sink>, ConnectorError> {
        let limits = self.limits();
        limits.validate()?;
        let formatter = self.destination.formatter()?;
        let name = self.destination.name();
        log::debug!("{name} sink: {} with {limits:?}", self.endpoint);

        Ok(match self.destination.transport() {
            Transport::Batch(body) => Box::new(
                BatchEndpointSink::new(name, &self.endpoint, formatter, limits, body)
                    .with_token(self.token.clone())
                    .with_timeout(config.http_timeout()),
            ),
            Transport::PerItem => Box::new(
                PerItemSink::new(name, &self.endpoint, formatter, limits, config.fan_out_width)
                    .with_token(self.token.clone())
                    .with_timeout(config.http_timeout()),
            ),
        })
    }
}
