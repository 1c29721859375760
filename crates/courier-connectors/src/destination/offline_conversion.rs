//! Click conversions attributed by click id

use std::sync::LazyLock;

use courier_core::{ErrorCode, Event, PayloadFormatter, required_str};
use regex::Regex;
use serde_json::{Map, Value};

/// `yyyymmdd hhmmss tz`, e.g. `20240131 235959 America/New_York`
static CONVERSION_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{8} \d{6} [A-Za-z0-9_/+\-:]+$").expect("valid conversion time regex")
});

static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("valid currency regex"));

#[derive(Debug, Clone, Copy)]
pub struct OfflineConversionFormatter;

fn conversion_value(event: &Event) -> Result<f64, ErrorCode> {
    let value = match event.get("conversionValue") {
        None | Some(Value::Null) => return Err(ErrorCode::MissingRequiredField),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    value
        .filter(|v| v.is_finite())
        .ok_or(ErrorCode::InvalidPayload)
}

impl PayloadFormatter for OfflineConversionFormatter {
    fn format(&self, event: &Event) -> Result<Value, ErrorCode> {
        let gclid = required_str(event, "gclid")?;
        let name = required_str(event, "conversionName")?;
        let time = required_str(event, "conversionTime")?;
        if !CONVERSION_TIME.is_match(time) {
            return Err(ErrorCode::InvalidPayload);
        }
        let value = conversion_value(event)?;

        let mut out = Map::new();
        out.insert("gclid".into(), gclid.into());
        out.insert("conversionName".into(), name.into());
        out.insert("conversionTime".into(), time.into());
        out.insert("conversionValue".into(), value.into());
        match event.get("currencyCode") {
            None | Some(Value::Null) => {}
            Some(Value::String(c)) if CURRENCY.is_match(c) => {
                out.insert("currencyCode".into(), c.as_str().into());
            }
            Some(_) => return Err(ErrorCode::InvalidPayload),
        }
        Ok(Value::Object(out))
    }
}
