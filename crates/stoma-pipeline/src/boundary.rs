//! The error boundary.
//!
//! Converts whatever escaped the policy chain into a response:
//!
//! | Escaped | Status | Body |
//! |---------|--------|------|
//! | [`GatewayError`](stoma_core::GatewayError) | its status | its code and message |
//! | [`PipelineError::Internal`] | 500 | fixed message, detail only logged |
//! | panic | 500 | fixed message, payload only logged |

use crate::types::{Response, ResponseExt};
use http::header::{HeaderName, HeaderValue};
use std::any::Any;
use stoma_core::{PipelineError, RequestId};

/// Renders a pipeline error as a JSON envelope response.
#[must_use]
pub fn error_response(error: &PipelineError, request_id: Option<RequestId>) -> Response {
    let id = request_id.map(|id| id.to_string());

    match error {
        PipelineError::Gateway(err) => {
            tracing::debug!(request_id = ?id, code = %err.code, status = %err.status, "request rejected");
        }
        PipelineError::Internal(source) => {
            tracing::error!(request_id = ?id, error = %format!("{source:#}"), "unhandled policy error");
        }
    }

    let envelope = error.to_envelope(id.as_deref());
    let body = match serde_json::to_vec(&envelope) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize error envelope");
            Vec::new()
        }
    };

    let mut response = Response::json(error.status(), body);
    if let PipelineError::Gateway(err) = error {
        for (name, value) in &err.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().append(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid error header"),
            }
        }
    }
    response
}

/// Renders a caught panic as a generic 500 response.
#[must_use]
pub fn panic_response(payload: &(dyn Any + Send), request_id: RequestId) -> Response {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    error_response(
        &PipelineError::internal(anyhow::anyhow!("policy panicked: {message}")),
        Some(request_id),
    )
}
