//! Shared HTTP client and runtime.
//!
//! Uses async reqwest on one shared tokio runtime, but presents a sync
//! interface to the sequential pipeline. Per-item fan-out drives the async
//! functions directly (see [`crate::fanout`]).

use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{ErrorCode, SendError};

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are cut to this many bytes in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// Errors from one HTTP exchange.
#[derive(Debug, Clone)]
pub enum HttpError {
    /// Server answered with a non-success status
    Status { status: u16, body: String },
    /// No usable response (connect, DNS, reset, timeout)
    Transport { timeout: bool, message: String },
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Transport {
                timeout: true,
                message,
            } => write!(f, "HTTP timeout: {message}"),
            Self::Transport { message, .. } => write!(f, "HTTP error: {message}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl HttpError {
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        match e.status() {
            Some(s) => Self::Status {
                status: s.as_u16(),
                body: e.to_string(),
            },
            None => Self::Transport {
                timeout: e.is_timeout(),
                message: e.to_string(),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Status { status, .. } => ErrorCode::from_http_status(*status),
            Self::Transport { timeout: true, .. } => ErrorCode::Timeout,
            Self::Transport { .. } => ErrorCode::ServiceUnavailable,
        }
    }
}

impl From<HttpError> for SendError {
    fn from(e: HttpError) -> Self {
        if e.is_auth() {
            Self::Authentication(e.to_string())
        } else {
            Self::Batch {
                code: e.error_code(),
                message: e.to_string(),
            }
        }
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub url: &'a str,
    pub body: String,
    pub content_type: &'a str,
    pub bearer: Option<&'a str>,
    pub timeout: Duration,
}

/// Status and body of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

/// POST asynchronously; non-2xx statuses become [`HttpError::Status`].
pub async fn post_async(req: Request<'_>) -> Result<Response, HttpError> {
    let mut builder = SHARED_CLIENT
        .post(req.url)
        .timeout(req.timeout)
        .header(reqwest::header::CONTENT_TYPE, req.content_type)
        .body(req.body);
    if let Some(token) = req.bearer {
        builder = builder.bearer_auth(token);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| HttpError::from_reqwest(&e))?;
    read_response(response).await
}

/// GET asynchronously.
pub async fn get_async(
    url: &str,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<Response, HttpError> {
    let mut builder = SHARED_CLIENT.get(url).timeout(timeout);
    if let Some(token) = bearer {
        builder = builder.bearer_auth(token);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| HttpError::from_reqwest(&e))?;
    read_response(response).await
}

async fn read_response(response: reqwest::Response) -> Result<Response, HttpError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| HttpError::from_reqwest(&e))?;
    if !(200..300).contains(&status) {
        return Err(HttpError::Status {
            status,
            body: truncate(&body, ERROR_BODY_LIMIT).to_string(),
        });
    }
    Ok(Response { status, body })
}

/// Blocking POST on the shared runtime.
pub fn post(req: Request<'_>) -> Result<Response, HttpError> {
    SHARED_RUNTIME.handle().block_on(post_async(req))
}

/// Blocking GET on the shared runtime.
pub fn get(url: &str, bearer: Option<&str>, timeout: Duration) -> Result<Response, HttpError> {
    SHARED_RUNTIME
        .handle()
        .block_on(get_async(url, bearer, timeout))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
