//! Measurement-protocol hits, URL-encoded

use std::sync::LazyLock;

use courier_core::{ErrorCode, Event, PayloadFormatter};
use regex::Regex;
use reqwest::Url;
use serde_json::Value;

use crate::error::ConnectorError;

static TRACKING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(UA|YT|MO)-\d+-\d+$").expect("valid tracking id regex"));

const HIT_TYPES: &[&str] = &[
    "pageview",
    "screenview",
    "event",
    "transaction",
    "item",
    "social",
    "exception",
    "timing",
];

/// Protocol fields set by the formatter, never taken from the event.
const RESERVED: &[&str] = &["v", "tid"];

/// Builds one `key=value&...` hit per event.
#[derive(Debug, Clone)]
pub struct AnalyticsHitFormatter {
    tracking_id: String,
}

impl AnalyticsHitFormatter {
    pub fn new(tracking_id: &str) -> Result<Self, ConnectorError> {
        if !TRACKING_ID.is_match(tracking_id) {
            return Err(ConnectorError::InvalidConfig(format!(
                "tracking id {tracking_id:?} does not look like UA-XXXX-Y"
            )));
        }
        Ok(Self {
            tracking_id: tracking_id.to_string(),
        })
    }
}

/// Scalar field value as hit text. `None` for nulls, which are omitted.
fn hit_value(value: &Value) -> Result<Option<String>, ErrorCode> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(if *b { "1" } else { "0" }.to_string())),
        Value::Array(_) | Value::Object(_) => Err(ErrorCode::InvalidPayload),
    }
}

fn has_identity(event: &Event, key: &str) -> bool {
    match event.get(key) {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

fn urlencode<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<String, ErrorCode> {
    let mut url = Url::parse("http://hit.local/").map_err(|_| ErrorCode::InvalidPayload)?;
    url.query_pairs_mut().extend_pairs(pairs);
    Ok(url.query().unwrap_or_default().to_string())
}

impl PayloadFormatter for AnalyticsHitFormatter {
    fn format(&self, event: &Event) -> Result<Value, ErrorCode> {
        if !has_identity(event, "cid") && !has_identity(event, "uid") {
            return Err(ErrorCode::MissingRequiredField);
        }
        let hit_type = courier_core::required_str(event, "t")?;
        if !HIT_TYPES.contains(&hit_type) {
            return Err(ErrorCode::InvalidPayload);
        }

        let mut fields: Vec<(&str, String)> = vec![("v", "1".into()), ("tid", self.tracking_id.clone())];
        for (key, value) in event {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            if let Some(text) = hit_value(value)? {
                fields.push((key.as_str(), text));
            }
        }
        let hit = urlencode(fields.iter().map(|(k, v)| (*k, v.as_str())))?;
        Ok(Value::String(hit))
    }
}
