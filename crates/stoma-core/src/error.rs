//! Error types for Stoma.
//!
//! Policies fail in one of two ways:
//!
//! - [`GatewayError`] - the expected, structured way to reject a request. It
//!   carries a status code, a short machine-readable code, a human message
//!   and optional extra response headers.
//! - [`PipelineError::Internal`] - anything else. These are rendered as a
//!   generic 500 with a fixed message; the original detail is only logged.
//!
//! Both are converted into an [`ErrorEnvelope`] at the pipeline boundary:
//!
//! ```json
//! {
//!   "error": "rate_limited",
//!   "message": "Too many requests",
//!   "statusCode": 429,
//!   "requestId": "0190b7e4-..."
//! }
//! ```

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable code used for every unrecognized error.
pub const INTERNAL_ERROR_CODE: &str = "internal_error";

/// Client-facing message used for every unrecognized error.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// A structured gateway error.
///
/// This is how a policy rejects a request. The same shape is used as the
/// `reject` variant of [`PolicyResult`](crate::PolicyResult), so the HTTP
/// surface and the evaluate surface describe a rejection identically.
///
/// # Example
///
/// ```
/// use stoma_core::GatewayError;
/// use http::StatusCode;
///
/// let err = GatewayError::unauthorized("Missing API key")
///     .with_header("www-authenticate", "ApiKey");
///
/// assert_eq!(err.status, StatusCode::UNAUTHORIZED);
/// assert_eq!(err.code, "unauthorized");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code} ({status}): {message}")]
pub struct GatewayError {
    /// HTTP status code returned to the client.
    pub status: StatusCode,
    /// Short machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Extra response headers (e.g. `retry-after`).
    pub headers: Vec<(String, String)>,
}

impl GatewayError {
    /// Creates a gateway error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            headers: Vec::new(),
        }
    }

    /// Adds an extra response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 400 `bad_request`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 401 `unauthorized`.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 403 `forbidden`.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    /// 404 `not_found`.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 429 `rate_limited`, with a `retry-after` header when known.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after_seconds: Option<u64>) -> Self {
        let err = Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message);
        match retry_after_seconds {
            Some(secs) => err.with_header("retry-after", secs.to_string()),
            None => err,
        }
    }

    /// 504 `gateway_timeout`.
    #[must_use]
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", message)
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.code.clone(),
            message: self.message.clone(),
            status_code: self.status.as_u16(),
            request_id: request_id.map(ToString::to_string),
        }
    }
}

/// Any error that can escape a policy.
///
/// Policies return `Result<Response, PipelineError>`. A [`GatewayError`]
/// converts via `?`; so does an [`anyhow::Error`], which lets policies use
/// `anyhow::Context` on arbitrary fallible calls.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A structured rejection.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// An unrecognized failure. Never shown to clients.
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl PipelineError {
    /// Wraps any error as an unrecognized failure.
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Self::Internal(source.into())
    }

    /// Returns the HTTP status this error renders as.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Gateway(err) => err.status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable code this error renders as.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Gateway(err) => &err.code,
            Self::Internal(_) => INTERNAL_ERROR_CODE,
        }
    }

    /// Returns `true` for structured rejections.
    #[must_use]
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    /// Converts this error to the client-facing envelope.
    ///
    /// Internal errors always produce the fixed message.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        match self {
            Self::Gateway(err) => err.to_envelope(request_id),
            Self::Internal(_) => ErrorEnvelope {
                error: INTERNAL_ERROR_CODE.to_string(),
                message: INTERNAL_ERROR_MESSAGE.to_string(),
                status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                request_id: request_id.map(ToString::to_string),
            },
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(source: anyhow::Error) -> Self {
        Self::Internal(source)
    }
}

/// Serializable error body for HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status code, repeated in the body.
    pub status_code: u16,
    /// The request ID for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
