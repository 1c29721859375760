//! Destination classes: payload formatter, default limits and transport

mod analytics;
mod customer_match;
mod offline_conversion;

pub use analytics::AnalyticsHitFormatter;
pub use customer_match::{ContactInfoFormatter, CrmIdFormatter, MobileIdFormatter, UploadKeyType};
pub use offline_conversion::OfflineConversionFormatter;

use courier_core::{BatchLimits, ErrorCode, Event, PayloadFormatter};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ConnectorError;
use crate::sink::BodyFormat;

/// Default batch size for webhooks, which have no vendor limit.
const WEBHOOK_MAX_COUNT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "destination", rename_all = "snake_case")]
pub enum Destination {
    AnalyticsHit { tracking_id: String },
    CustomerMatch { key_type: UploadKeyType },
    OfflineConversion,
    /// Generic JSON endpoint taking one event per request
    Webhook,
}

/// How a destination receives a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// One request carrying the whole batch
    Batch(BodyFormat),
    /// One concurrent request per item
    PerItem,
}

impl Destination {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnalyticsHit { .. } => "analytics_hit",
            Self::CustomerMatch { .. } => "customer_match",
            Self::OfflineConversion => "offline_conversion",
            Self::Webhook => "webhook",
        }
    }

    pub fn default_limits(&self) -> BatchLimits {
        match self {
            Self::AnalyticsHit { .. } => BatchLimits {
                max_count: 20,
                max_bytes_per_item: Some(8192),
                max_bytes_per_batch: Some(16384),
            },
            Self::CustomerMatch { .. } => BatchLimits::count(1000),
            Self::OfflineConversion => BatchLimits::count(2000),
            Self::Webhook => BatchLimits::count(WEBHOOK_MAX_COUNT),
        }
    }

    pub fn formatter(&self) -> Result<Box<dyn PayloadFormatter>, ConnectorError> {
        Ok(match self {
            Self::AnalyticsHit { tracking_id } => Box::new(AnalyticsHitFormatter::new(tracking_id)?),
            Self::CustomerMatch { key_type } => key_type.formatter(),
            Self::OfflineConversion => Box::new(OfflineConversionFormatter),
            Self::Webhook => Box::new(PassthroughFormatter),
        })
    }

    pub fn transport(&self) -> Transport {
        match self {
            Self::AnalyticsHit { .. } => Transport::Batch(BodyFormat::Lines),
            Self::CustomerMatch { .. } => Transport::Batch(BodyFormat::Envelope {
                key: "members",
                partial_failure: true,
            }),
            Self::OfflineConversion => Transport::Batch(BodyFormat::Envelope {
                key: "conversions",
                partial_failure: true,
            }),
            Self::Webhook => Transport::PerItem,
        }
    }
}

/// Sends the event unchanged as a JSON object.
#[derive(Debug, Clone, Copy)]
pub struct PassthroughFormatter;

impl PayloadFormatter for PassthroughFormatter {
    fn format(&self, event: &Event) -> Result<Value, ErrorCode> {
        Ok(Value::Object(event.clone()))
    }
}
