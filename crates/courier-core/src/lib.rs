//! Courier Core - shared model and machinery for batch-delivery pipelines
//!
//! Events are read from a source as positioned blobs, validated and batched
//! under destination limits, and delivered with per-item outcomes and
//! bounded retries. Checkpointing lives in `courier-checkpoint`; concrete
//! sources and destinations in `courier-connectors`.

pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod fanout;
pub mod format;
pub mod http;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod source;

// Re-exports for convenience
pub use batch::{Batch, BatchConfigError, BatchItem, BatchLimits, Batched, batch, json_size};
pub use config::{Config, ConfigError};
pub use error::{ErrorCode, Partition, SendError};
pub use event::{Blob, DeliveryReport, Event, FailedEvent, Outcome};
pub use fanout::fan_out;
pub use format::{PayloadFormatter, UNPARSED_FIELD, Validated, required_str, validate_blob};
pub use http::{HttpError, SHARED_RUNTIME, http_client};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{AttemptState, Delivery, RetryController, RetryPolicy, Terminal};
pub use shutdown::ShutdownSignal;
pub use sink::{SendReport, Sink};
pub use source::{BlobReader, PagedSource, ReadCursor, ResumeRange, SourceError, merge_ranges};
