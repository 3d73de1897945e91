//! The protocol-agnostic evaluation contract.
//!
//! Policies that want to run outside native HTTP (gRPC filters, WebSocket
//! frames, external-processing sidecars) implement an evaluate surface that
//! works purely on data:
//!
//! ```text
//!   native message ──► PolicyInput ──► evaluate ──► PolicyResult ──► native action
//!                      (snapshot)                   continue / reject / immediate
//! ```
//!
//! Evaluate never touches live state. Every change it wants is described as a
//! [`Mutation`] and applied by the runtime after evaluate returns.

use crate::error::GatewayError;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cross-policy attributes, keyed by namespaced names (e.g. `auth.subject`).
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A lifecycle point in message processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Request headers received.
    RequestHeaders,
    /// Request body available.
    RequestBody,
    /// Request trailers received.
    RequestTrailers,
    /// Response headers received from the backend.
    ResponseHeaders,
    /// Response body available.
    ResponseBody,
    /// Response trailers received.
    ResponseTrailers,
}

impl Phase {
    /// All six phases in lifecycle order.
    pub const ALL: [Phase; 6] = [
        Self::RequestHeaders,
        Self::RequestBody,
        Self::RequestTrailers,
        Self::ResponseHeaders,
        Self::ResponseBody,
        Self::ResponseTrailers,
    ];

    /// Phases a policy is invoked for when it declares none.
    pub const DEFAULT: [Phase; 2] = [Self::RequestHeaders, Self::ResponseHeaders];

    /// Returns true for the three request-side phases.
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            Self::RequestHeaders | Self::RequestBody | Self::RequestTrailers
        )
    }

    /// Returns true for the three response-side phases.
    #[must_use]
    pub const fn is_response(self) -> bool {
        !self.is_request()
    }

    /// Returns the wire name of this phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestHeaders => "request-headers",
            Self::RequestBody => "request-body",
            Self::RequestTrailers => "request-trailers",
            Self::ResponseHeaders => "response-headers",
            Self::ResponseBody => "response-body",
            Self::ResponseTrailers => "response-trailers",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport a [`PolicyInput`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Native HTTP.
    Http,
    /// gRPC (e.g. via an external-processing filter).
    Grpc,
    /// WebSocket frames.
    WebSocket,
}

/// A declarative header change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMutation {
    /// Replace any existing values.
    Set {
        /// Header name.
        name: String,
        /// New value.
        value: String,
    },
    /// Add a value, keeping existing ones.
    Append {
        /// Header name.
        name: String,
        /// Value to add.
        value: String,
    },
    /// Remove all values.
    Remove {
        /// Header name.
        name: String,
    },
}

/// A declarative body change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyMutation {
    /// Replace the body.
    Replace(Bytes),
    /// Remove the body.
    Clear,
}

/// A declarative change, applied by the runtime after evaluate returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Change a header.
    Header(HeaderMutation),
    /// Change the body.
    Body(BodyMutation),
    /// Change the response status. Only valid in response phases.
    Status(StatusCode),
    /// Set a cross-policy attribute.
    Attribute {
        /// Namespaced key.
        key: String,
        /// Value.
        value: serde_json::Value,
    },
}

impl Mutation {
    /// `header` / `set`.
    #[must_use]
    pub fn set_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header(HeaderMutation::Set {
            name: name.into(),
            value: value.into(),
        })
    }

    /// `header` / `append`.
    #[must_use]
    pub fn append_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header(HeaderMutation::Append {
            name: name.into(),
            value: value.into(),
        })
    }

    /// `header` / `remove`.
    #[must_use]
    pub fn remove_header(name: impl Into<String>) -> Self {
        Self::Header(HeaderMutation::Remove { name: name.into() })
    }

    /// `attribute`.
    #[must_use]
    pub fn attribute(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Attribute {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A response produced directly by a policy, without reaching the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

/// The outcome of one evaluate call.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyResult {
    /// Proceed, optionally applying mutations.
    Continue {
        /// Changes to apply before proceeding.
        mutations: Vec<Mutation>,
    },
    /// Stop with a structured error.
    Reject(GatewayError),
    /// Stop and answer with this response.
    ImmediateResponse(ImmediateResponse),
}

impl PolicyResult {
    /// `continue` with no mutations.
    #[must_use]
    pub fn pass() -> Self {
        Self::Continue {
            mutations: Vec::new(),
        }
    }

    /// `continue` with mutations.
    #[must_use]
    pub fn pass_with(mutations: Vec<Mutation>) -> Self {
        Self::Continue { mutations }
    }

    /// `reject`.
    #[must_use]
    pub fn reject(error: GatewayError) -> Self {
        Self::Reject(error)
    }

    /// Returns true for `continue`.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue { .. })
    }

    /// Returns true for `reject`.
    #[must_use]
    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}

impl From<GatewayError> for PolicyResult {
    fn from(error: GatewayError) -> Self {
        Self::Reject(error)
    }
}

/// A protocol-agnostic snapshot handed to evaluate.
///
/// Built fresh per phase by the runtime. Policies receive it by shared
/// reference and never mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyInput {
    /// The phase this snapshot was taken in.
    pub phase: Phase,
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Headers of the message for this phase.
    pub headers: HeaderMap,
    /// Client address, when the runtime knows it.
    pub client_ip: Option<String>,
    /// Message body, when buffered for a body phase.
    pub body: Option<Bytes>,
    /// Trailers, for trailer phases.
    pub trailers: Option<HeaderMap>,
    /// Cross-policy attributes.
    pub attributes: Attributes,
    /// Originating transport.
    pub protocol: Protocol,
}

impl PolicyInput {
    /// Creates an input with no headers, body or attributes.
    #[must_use]
    pub fn new(phase: Phase, method: Method, path: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            phase,
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            client_ip: None,
            body: None,
            trailers: None,
            attributes: Attributes::new(),
            protocol,
        }
    }

    /// Sets the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Adds one header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the client IP.
    #[must_use]
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the trailers.
    #[must_use]
    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns an attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Produces the snapshot the next policy sees after `mutations`.
    ///
    /// Status mutations have no place in a snapshot and are dropped here;
    /// runtimes apply them to the native response directly.
    #[must_use]
    pub fn advanced(&self, mutations: &[Mutation]) -> Self {
        let mut next = self.clone();
        for mutation in mutations {
            match mutation {
                Mutation::Header(change) => apply_header_mutation(&mut next.headers, change),
                Mutation::Body(BodyMutation::Replace(bytes)) => next.body = Some(bytes.clone()),
                Mutation::Body(BodyMutation::Clear) => next.body = None,
                Mutation::Attribute { key, value } => {
                    next.attributes.insert(key.clone(), value.clone());
                }
                Mutation::Status(_) => {}
            }
        }
        next
    }
}

/// Applies one header mutation to a header map.
///
/// Invalid names or values are skipped with a warning; a bad mutation
/// degrades that change only.
pub fn apply_header_mutation(headers: &mut HeaderMap, mutation: &HeaderMutation) {
    match mutation {
        HeaderMutation::Set { name, value } | HeaderMutation::Append { name, value } => {
            let (Ok(header_name), Ok(header_value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                tracing::warn!(header = %name, "ignoring header mutation with invalid name or value");
                return;
            };
            if matches!(mutation, HeaderMutation::Set { .. }) {
                headers.insert(header_name, header_value);
            } else {
                headers.append(header_name, header_value);
            }
        }
        HeaderMutation::Remove { name } => {
            if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.remove(header_name);
            }
        }
    }
}

/// Extracts the client IP from proxy headers.
///
/// Prefers `cf-connecting-ip`, then the first entry of `x-forwarded-for`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(ip) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        let ip = ip.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(ToString::to_string)
}
