//! Per-destination payload validation

use serde_json::Value;

use crate::batch::json_size;
use crate::error::ErrorCode;
use crate::event::{Blob, Event};

/// Field a source puts on an event whose raw record could not be parsed.
/// Such events are rejected before reaching any formatter.
pub const UNPARSED_FIELD: &str = "_unparsed";

/// Turns events into destination wire payloads.
///
/// One implementation per upload-key type; the destination picks one at
/// construction time.
pub trait PayloadFormatter: Send + Sync {
    /// Validate `event` and build its payload.
    fn format(&self, event: &Event) -> Result<Value, ErrorCode>;

    /// Bytes the payload occupies on the wire.
    fn wire_size(&self, payload: &Value) -> usize {
        json_size(payload)
    }
}

/// Outcome of validating every event of a blob.
#[derive(Debug, Default)]
pub struct Validated {
    pub payloads: Vec<(usize, Value)>,
    pub rejected: Vec<(usize, ErrorCode)>,
}

/// Run `formatter` over every event of `blob`, keeping blob indices.
///
/// Rejections are always non-retriable: a retriable code from the formatter
/// is recorded as [`ErrorCode::InvalidPayload`].
pub fn validate_blob(formatter: &dyn PayloadFormatter, blob: &Blob) -> Validated {
    let mut out = Validated::default();
    for (index, event) in blob.indexed_events() {
        if event.contains_key(UNPARSED_FIELD) {
            out.rejected.push((index, ErrorCode::InvalidPayload));
            continue;
        }
        match formatter.format(event) {
            Ok(payload) => out.payloads.push((index, payload)),
            Err(code) if code.is_retriable() => {
                log::warn!("{}: formatter rejected event {index} with retriable {code}", blob.location);
                out.rejected.push((index, ErrorCode::InvalidPayload));
            }
            Err(code) => out.rejected.push((index, code)),
        }
    }
    out
}

/// Look up a required string field.
pub fn required_str<'a>(event: &'a Event, key: &str) -> Result<&'a str, ErrorCode> {
    match event.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(Value::Null) | None => Err(ErrorCode::MissingRequiredField),
        Some(Value::String(_)) => Err(ErrorCode::MissingRequiredField),
        Some(_) => Err(ErrorCode::InvalidPayload),
    }
}
