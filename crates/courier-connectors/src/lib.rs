//! Concrete sources and destinations for courier pipelines
//!
//! Sources: NDJSON files (plain or gzip, single file or glob) and paginated
//! HTTP tables. Destinations: analytics hits, customer-match uploads, offline
//! conversions (batch endpoints) and generic webhooks (per-item fan-out).

pub mod destination;
pub mod error;
pub mod sink;
pub mod source;

pub use destination::{Destination, Transport, UploadKeyType};
pub use error::ConnectorError;
pub use sink::{BatchEndpointSink, BodyFormat, PerItemSink, SinkSettings};
pub use source::{HttpTableSource, NdjsonFileSource, SourceSettings};
