//! Destinations taking a whole batch per request

use std::time::Duration;

use courier_core::http::{self, Request};
use courier_core::{Batch, BatchLimits, Outcome, PayloadFormatter, SendError, SendReport, Sink};
use serde_json::{Map, Value};

use super::partial::parse_partial_failure;

/// Request body layout of a batch endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// Payload strings joined by newlines; no per-item errors in the response
    Lines,
    /// `{"<key>": [payloads...]}`, optionally asking for partial-failure details
    Envelope {
        key: &'static str,
        partial_failure: bool,
    },
}

pub struct BatchEndpointSink {
    name: String,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
    limits: BatchLimits,
    formatter: Box<dyn PayloadFormatter>,
    body: BodyFormat,
}

impl BatchEndpointSink {
    pub fn new(
        name: &str,
        endpoint: &str,
        formatter: Box<dyn PayloadFormatter>,
        limits: BatchLimits,
        body: BodyFormat,
    ) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            limits,
            formatter,
            body,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request body and its content type.
    fn render(&self, batch: &Batch) -> (String, &'static str) {
        match self.body {
            BodyFormat::Lines => {
                let lines: Vec<String> = batch
                    .payloads()
                    .map(|p| match p {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                (lines.join("\n"), "text/plain")
            }
            BodyFormat::Envelope {
                key,
                partial_failure,
            } => {
                let mut body = Map::new();
                body.insert(key.to_string(), Value::Array(batch.payloads().cloned().collect()));
                if partial_failure {
                    body.insert("partialFailure".into(), Value::Bool(true));
                }
                (Value::Object(body).to_string(), "application/json")
            }
        }
    }

    /// Per-item outcomes from a 2xx response body.
    fn interpret(&self, len: usize, body: String) -> SendReport {
        let raw = (!body.is_empty()).then_some(body);
        match self.body {
            BodyFormat::Envelope {
                partial_failure: true,
                ..
            } => match parse_partial_failure(raw.as_deref().unwrap_or_default(), len) {
                Ok(failures) => SendReport::from_failures(len, failures, raw),
                Err(code) => SendReport::uniform(len, Outcome::Failed(code), raw),
            },
            _ => SendReport::uniform(len, Outcome::Delivered, raw),
        }
    }
}

impl Sink for BatchEndpointSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn formatter(&self) -> &dyn PayloadFormatter {
        self.formatter.as_ref()
    }

    fn send(&self, batch: &Batch) -> Result<SendReport, SendError> {
        let (body, content_type) = self.render(batch);
        let response = http::post(Request {
            url: &self.endpoint,
            body,
            content_type,
            bearer: self.token.as_deref(),
            timeout: self.timeout,
        })?;
        Ok(self.interpret(batch.len(), response.body))
    }
}
