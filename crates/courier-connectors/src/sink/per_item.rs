//! Destinations without a batch endpoint: one concurrent request per item

use std::time::Duration;

use courier_core::http::{self, HttpError, Request, Response};
use courier_core::{
    Batch, BatchLimits, Outcome, PayloadFormatter, SendError, SendReport, Sink, fan_out,
};
use serde_json::Value;

pub struct PerItemSink {
    name: String,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
    width: usize,
    limits: BatchLimits,
    formatter: Box<dyn PayloadFormatter>,
}

impl PerItemSink {
    pub fn new(
        name: &str,
        endpoint: &str,
        formatter: Box<dyn PayloadFormatter>,
        limits: BatchLimits,
        width: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            width,
            limits,
            formatter,
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
}

/// Fold per-item responses, already in batch order, into one report.
///
/// Any rejected credential fails the whole call, but only after every
/// response is in.
fn assemble(results: Vec<Result<Response, HttpError>>) -> Result<SendReport, SendError> {
    if let Some(auth) = results
        .iter()
        .find_map(|r| r.as_ref().err().filter(|e| e.is_auth()))
    {
        return Err(SendError::Authentication(auth.to_string()));
    }

    let mut first_error = None;
    let outcomes = results
        .into_iter()
        .map(|r| match r {
            Ok(_) => Outcome::Delivered,
            Err(e) => {
                let code = e.error_code();
                first_error.get_or_insert_with(|| e.to_string());
                Outcome::Failed(code)
            }
        })
        .collect();
    Ok(SendReport {
        outcomes,
        raw_response: first_error,
    })
}

impl Sink for PerItemSink {
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
        let bodies: Vec<String> = batch.payloads().map(Value::to_string).collect();
        let results = fan_out(bodies, self.width, |body| {
            http::post_async(Request {
                url: &self.endpoint,
                body,
                content_type: "application/json",
                bearer: self.token.as_deref(),
                timeout: self.timeout,
            })
        });
        assemble(results)
    }
}
