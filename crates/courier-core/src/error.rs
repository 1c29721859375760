//! Delivery error taxonomy
//!
//! Every failure surfaced anywhere in the pipeline carries exactly one
//! [`ErrorCode`]. Codes `10..=49` are retriable and `50..=99` are not, so a
//! numeric code read back from the checkpoint log is enough to recover the
//! retry partition.

use std::fmt;

/// Stable failure classification. The numeric values are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    /// Credentials rejected or expired (401/403)
    AuthenticationFailed,
    /// Destination throttled the request (429)
    RateLimited,
    /// Destination returned a 5xx
    ServerError,
    /// Connection refused, reset, DNS failure
    ServiceUnavailable,
    /// Request or read timed out
    Timeout,
    /// Destination marked the item as failed but transient
    PartialFailureRetriable,
    /// Event could not be turned into a destination payload
    InvalidPayload,
    /// Event lacks a field the destination requires
    MissingRequiredField,
    /// Serialized payload exceeds the per-item byte limit
    PayloadTooLarge,
    /// Destination permanently rejected the item or request (4xx)
    RejectedByDestination,
    /// Destination response could not be reconciled with the batch
    MalformedResponse,
}

/// Retry partition of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Retriable,
    NonRetriable,
}

impl ErrorCode {
    /// Persisted numeric code.
    pub const fn code(self) -> i32 {
        match self {
            Self::AuthenticationFailed => 10,
            Self::RateLimited => 11,
            Self::ServerError => 12,
            Self::ServiceUnavailable => 13,
            Self::Timeout => 14,
            Self::PartialFailureRetriable => 15,
            Self::InvalidPayload => 50,
            Self::MissingRequiredField => 51,
            Self::PayloadTooLarge => 52,
            Self::RejectedByDestination => 53,
            Self::MalformedResponse => 54,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: i32) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.code() == code)
    }

    pub const fn partition(self) -> Partition {
        if self.code() < 50 {
            Partition::Retriable
        } else {
            Partition::NonRetriable
        }
    }

    pub const fn is_retriable(self) -> bool {
        matches!(self.partition(), Partition::Retriable)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::PartialFailureRetriable => "partial_failure_retriable",
            Self::InvalidPayload => "invalid_payload",
            Self::MissingRequiredField => "missing_required_field",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RejectedByDestination => "rejected_by_destination",
            Self::MalformedResponse => "malformed_response",
        }
    }

    /// Classify an HTTP status returned by a destination.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed,
            408 => Self::Timeout,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::RejectedByDestination,
        }
    }

    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::AuthenticationFailed,
            Self::RateLimited,
            Self::ServerError,
            Self::ServiceUnavailable,
            Self::Timeout,
            Self::PartialFailureRetriable,
            Self::InvalidPayload,
            Self::MissingRequiredField,
            Self::PayloadTooLarge,
            Self::RejectedByDestination,
            Self::MalformedResponse,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Batch-level failure escaping a [`Sink`](crate::sink::Sink).
///
/// Per-item failures never take this path; they are reported as
/// [`Outcome::Failed`](crate::event::Outcome::Failed) entries instead.
#[derive(Debug)]
pub enum SendError {
    /// Credentials rejected. Remaining batches of the run cannot succeed.
    Authentication(String),
    /// Failure that applies to every item of the batch.
    Batch { code: ErrorCode, message: String },
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication(msg) => write!(f, "authentication failed: {msg}"),
            Self::Batch { code, message } => write!(f, "batch failed with {code}: {message}"),
        }
    }
}

impl std::error::Error for SendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for code in ErrorCode::all() {
            assert_eq!(ErrorCode::from_code(code.code()), Some(*code));
        }
        assert_eq!(ErrorCode::from_code(0), None);
        assert_eq!(ErrorCode::from_code(-2), None);
    }

    #[test]
    fn codes_are_unique_and_positive() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(code.code() > 0);
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn partition_follows_code_range() {
        assert!(ErrorCode::RateLimited.is_retriable());
        assert!(ErrorCode::AuthenticationFailed.is_retriable());
        assert!(ErrorCode::Timeout.is_retriable());
        assert!(!ErrorCode::InvalidPayload.is_retriable());
        assert!(!ErrorCode::PayloadTooLarge.is_retriable());
        assert_eq!(
            ErrorCode::RejectedByDestination.partition(),
            Partition::NonRetriable
        );
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(ErrorCode::from_http_status(429), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_http_status(503), ErrorCode::ServerError);
        assert_eq!(
            ErrorCode::from_http_status(401),
            ErrorCode::AuthenticationFailed
        );
        assert_eq!(
            ErrorCode::from_http_status(400),
            ErrorCode::RejectedByDestination
        );
        assert_eq!(ErrorCode::from_http_status(408), ErrorCode::Timeout);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            format!("{}", ErrorCode::PayloadTooLarge),
            "payload_too_large (52)"
        );
    }
}
