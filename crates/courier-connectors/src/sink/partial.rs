//! Partial-failure responses of batch endpoints

use courier_core::ErrorCode;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(rename = "partialFailureError")]
    partial_failure_error: Option<PartialFailure>,
}

#[derive(Debug, Deserialize)]
struct PartialFailure {
    #[serde(default)]
    details: Vec<Detail>,
}

#[derive(Debug, Deserialize)]
struct Detail {
    /// Position inside the sent batch
    index: usize,
    #[serde(default)]
    retriable: bool,
    #[serde(default)]
    message: String,
}

/// Failed positions of a `len`-item batch, as listed by the destination.
///
/// An empty body or a body without `partialFailureError` means every item was
/// accepted. A body that cannot be decoded, or that names a position outside
/// the batch, is a [`ErrorCode::MalformedResponse`].
pub fn parse_partial_failure(body: &str, len: usize) -> Result<Vec<(usize, ErrorCode)>, ErrorCode> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: Response = serde_json::from_str(body).map_err(|e| {
        log::warn!("undecodable destination response: {e}");
        ErrorCode::MalformedResponse
    })?;
    let Some(partial) = response.partial_failure_error else {
        return Ok(Vec::new());
    };

    let mut failures = Vec::with_capacity(partial.details.len());
    for detail in partial.details {
        if detail.index >= len {
            log::warn!(
                "partial failure for position {} of a {len}-item batch",
                detail.index
            );
            return Err(ErrorCode::MalformedResponse);
        }
        let code = if detail.retriable {
            ErrorCode::PartialFailureRetriable
        } else {
            ErrorCode::RejectedByDestination
        };
        log::debug!("item {} failed: {}", detail.index, detail.message);
        failures.push((detail.index, code));
    }
    Ok(failures)
}
