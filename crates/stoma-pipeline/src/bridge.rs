//! Translation between native HTTP messages and the evaluation contract.
//!
//! These helpers let an HTTP runtime drive a policy's evaluate surface:
//! build a [`PolicyInput`] from the request or response, call evaluate, then
//! apply the returned mutations or turn the terminal result into a
//! response.

use crate::boundary;
use crate::types::{Request, Response, ResponseExt};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use http_body_util::{BodyExt, Full};
use stoma_core::{
    apply_header_mutation, client_ip, Attributes, BodyMutation, ImmediateResponse, Mutation,
    Phase, PolicyInput, PolicyResult, Protocol, RequestId,
};

/// Builds a request-side input (no body).
#[must_use]
pub fn input_from_request(request: &Request, phase: Phase, attributes: &Attributes) -> PolicyInput {
    let mut input = PolicyInput::new(
        phase,
        request.method().clone(),
        request.uri().path(),
        Protocol::Http,
    )
    .with_headers(request.headers().clone());
    input.client_ip = client_ip(request.headers());
    input.attributes = attributes.clone();
    input
}

/// Builds a response-side input.
///
/// Method, path and client IP come from `request`, the request-side input
/// of the same exchange.
#[must_use]
pub fn input_from_response(
    request: &PolicyInput,
    response: &Response,
    phase: Phase,
    attributes: &Attributes,
) -> PolicyInput {
    PolicyInput {
        phase,
        method: request.method.clone(),
        path: request.path.clone(),
        headers: response.headers().clone(),
        client_ip: request.client_ip.clone(),
        body: None,
        trailers: None,
        attributes: attributes.clone(),
        protocol: Protocol::Http,
    }
}

/// Buffers a request body so it can be handed to a body-phase evaluate.
pub async fn buffer_request(request: Request) -> (Request, Bytes) {
    let (parts, body) = request.into_parts();
    let bytes = collect(body).await;
    (Request::from_parts(parts, Full::new(bytes.clone())), bytes)
}

/// Buffers a response body so it can be handed to a body-phase evaluate.
pub async fn buffer_response(response: Response) -> (Response, Bytes) {
    let (parts, body) = response.into_parts();
    let bytes = collect(body).await;
    (Response::from_parts(parts, Full::new(bytes.clone())), bytes)
}

async fn collect(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

/// Applies `continue` mutations to a request.
///
/// Status mutations are only valid in response phases; they are logged and
/// ignored here.
pub fn apply_request_mutations(request: &mut Request, mutations: &[Mutation], attributes: &mut Attributes) {
    for mutation in mutations {
        match mutation {
            Mutation::Header(change) => apply_header_mutation(request.headers_mut(), change),
            Mutation::Body(change) => {
                request.headers_mut().remove(CONTENT_LENGTH);
                *request.body_mut() = replacement_body(change);
            }
            Mutation::Status(status) => {
                tracing::warn!(%status, "ignoring status mutation in a request phase");
            }
            Mutation::Attribute { key, value } => {
                attributes.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Applies `continue` mutations to a response.
pub fn apply_response_mutations(response: &mut Response, mutations: &[Mutation], attributes: &mut Attributes) {
    for mutation in mutations {
        match mutation {
            Mutation::Header(change) => apply_header_mutation(response.headers_mut(), change),
            Mutation::Body(change) => {
                response.headers_mut().remove(CONTENT_LENGTH);
                *response.body_mut() = replacement_body(change);
            }
            Mutation::Status(status) => *response.status_mut() = *status,
            Mutation::Attribute { key, value } => {
                attributes.insert(key.clone(), value.clone());
            }
        }
    }
}

fn replacement_body(change: &BodyMutation) -> Full<Bytes> {
    match change {
        BodyMutation::Replace(bytes) => Full::new(bytes.clone()),
        BodyMutation::Clear => Full::new(Bytes::new()),
    }
}

/// Converts an `immediate-response` into an HTTP response.
#[must_use]
pub fn immediate_response(immediate: ImmediateResponse) -> Response {
    let mut response = Response::empty(immediate.status);
    *response.body_mut() = Full::new(immediate.body);
    for (name, value) in &immediate.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid immediate-response header"),
        }
    }
    response
}

/// Converts a terminal result into a response.
///
/// Returns `None` for `continue`.
#[must_use]
pub fn result_response(result: PolicyResult, request_id: Option<RequestId>) -> Option<Response> {
    match result {
        PolicyResult::Continue { .. } => None,
        PolicyResult::Reject(err) => Some(boundary::error_response(&err.into(), request_id)),
        PolicyResult::ImmediateResponse(immediate) => Some(immediate_response(immediate)),
    }
}
