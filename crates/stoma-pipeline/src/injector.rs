//! The first and last step of every request.
//!
//! [`ContextInjector::prepare`] establishes identity and trace propagation
//! and parses the client's debug opt-in. [`ContextInjector::finalize`]
//! writes the identity headers, collected debug headers, the serialized
//! policy trace, and `Server-Timing` onto whatever response the pipeline
//! produced, including error and panic responses.

use crate::adapter::RuntimeAdapter;
use crate::context::{PolicyContext, RequestState};
use crate::debug::DebugHeaders;
use crate::logger::DebugLoggerFactory;
use crate::recorder::self_times;
use crate::trace::PolicyTrace;
use crate::types::{Request, Response};
use http::header::{HeaderName, HeaderValue};
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Instant;
use stoma_core::trace_context::{generate_span_id, generate_trace_id, TRACEPARENT_HEADER};
use stoma_core::{RequestId, TraceFlags, TraceParent};

/// Gateway name used when none is configured.
pub const DEFAULT_GATEWAY_NAME: &str = "stoma-gateway";

/// Default response header carrying the request id.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Default client opt-in header for debug output.
pub const DEFAULT_DEBUG_REQUEST_HEADER: &str = "x-stoma-debug";

/// Default response header carrying the serialized policy trace.
pub const DEFAULT_TRACE_HEADER: &str = "x-stoma-trace";

const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

/// Debug-header subsystem settings.
#[derive(Debug, Clone)]
pub struct DebugHeaderOptions {
    /// Header the client uses to opt in.
    pub request_header: HeaderName,
    /// Header the serialized trace is written to.
    pub trace_header: HeaderName,
    /// Operator allowlist. `None` means every name may be requested.
    pub allow: Option<HashSet<String>>,
}

impl Default for DebugHeaderOptions {
    fn default() -> Self {
        Self {
            request_header: HeaderName::from_static(DEFAULT_DEBUG_REQUEST_HEADER),
            trace_header: HeaderName::from_static(DEFAULT_TRACE_HEADER),
            allow: None,
        }
    }
}

/// Options shared by every pipeline of a gateway.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Name placed in every [`PolicyContext`].
    pub gateway_name: Arc<str>,
    /// Response header carrying the request id.
    pub request_id_header: HeaderName,
    /// Reuse a well-formed inbound request id.
    pub trust_incoming_request_id: bool,
    /// Debug-header settings. `None` disables the subsystem.
    pub debug_headers: Option<DebugHeaderOptions>,
    /// Debug-logger namespace patterns.
    pub debug_patterns: Vec<String>,
    /// Emit a `Server-Timing` header.
    pub server_timing: bool,
    /// Host runtime services.
    pub adapter: Option<Arc<dyn RuntimeAdapter>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            gateway_name: Arc::from(DEFAULT_GATEWAY_NAME),
            request_id_header: HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER),
            trust_incoming_request_id: false,
            debug_headers: None,
            debug_patterns: Vec::new(),
            server_timing: false,
            adapter: None,
        }
    }
}

impl PipelineOptions {
    /// Enables debug headers with default header names and no allowlist.
    #[must_use]
    pub fn with_debug_headers(mut self) -> Self {
        self.debug_headers = Some(DebugHeaderOptions::default());
        self
    }

    /// Restricts requestable debug headers to `allow`.
    ///
    /// Enables debug headers if they were not already.
    #[must_use]
    pub fn with_debug_allowlist<I, S>(mut self, allow: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let debug = self.debug_headers.get_or_insert_with(DebugHeaderOptions::default);
        debug.allow = Some(allow.into_iter().map(|s| s.into().to_ascii_lowercase()).collect());
        self
    }

    /// Enables the `Server-Timing` header.
    #[must_use]
    pub const fn with_server_timing(mut self) -> Self {
        self.server_timing = true;
        self
    }

    /// Sets the runtime adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn RuntimeAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }
}

impl fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("gateway_name", &self.gateway_name)
            .field("request_id_header", &self.request_id_header)
            .field("trust_incoming_request_id", &self.trust_incoming_request_id)
            .field("debug_headers", &self.debug_headers)
            .field("debug_patterns", &self.debug_patterns)
            .field("server_timing", &self.server_timing)
            .field("adapter", &self.adapter.is_some())
            .finish()
    }
}

/// Builds per-request state and writes identity headers.
#[derive(Debug, Clone)]
pub struct ContextInjector {
    options: PipelineOptions,
    loggers: DebugLoggerFactory,
}

impl ContextInjector {
    /// Creates an injector from pipeline options.
    #[must_use]
    pub fn new(options: PipelineOptions) -> Self {
        let loggers = DebugLoggerFactory::new(options.debug_patterns.iter().cloned());
        Self { options, loggers }
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Returns the debug-logger factory.
    #[must_use]
    pub const fn loggers(&self) -> &DebugLoggerFactory {
        &self.loggers
    }

    /// Creates the request state for `request` on `route`.
    #[must_use]
    pub fn prepare(&self, route: &Arc<str>, request: &Request) -> RequestState {
        let headers = request.headers();

        let inbound = headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(TraceParent::parse);
        let (trace_id, parent_span_id, trace_flags) = match inbound {
            Some(parent) => (parent.trace_id, Some(parent.parent_id), parent.flags),
            None => (generate_trace_id(), None, TraceFlags::default()),
        };

        let request_id = self
            .options
            .trust_incoming_request_id
            .then(|| headers.get(&self.options.request_id_header))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_default();

        let debug = self.options.debug_headers.as_ref().and_then(|opts| {
            headers
                .get(&opts.request_header)
                .and_then(|v| v.to_str().ok())
                .and_then(|value| DebugHeaders::parse(value, opts.allow.as_ref()))
        });

        let context = PolicyContext {
            request_id,
            started_at: Instant::now(),
            gateway_name: Arc::clone(&self.options.gateway_name),
            route: Arc::clone(route),
            trace_id,
            span_id: generate_span_id(),
            parent_span_id,
            trace_flags,
            loggers: self.loggers.clone(),
            adapter: self.options.adapter.clone(),
        };

        let debug_requested = debug.is_some();
        tracing::trace!(
            request_id = %context.request_id,
            trace_id = %context.trace_id,
            route = %context.route,
            debug_requested,
            "request context prepared"
        );

        RequestState::new(context, debug)
    }

    /// Writes identity, debug, trace, and timing headers onto `response`.
    pub fn finalize(&self, state: &RequestState, response: &mut Response) {
        let ctx = state.context();
        let elapsed = ctx.elapsed();
        let headers = response.headers_mut();

        insert(headers, self.options.request_id_header.clone(), &ctx.request_id().to_string());
        insert(
            headers,
            HeaderName::from_static(TRACEPARENT_HEADER),
            &TraceParent::format(ctx.trace_id(), ctx.span_id(), ctx.trace_flags()),
        );

        if let (Some(debug), Some(opts)) = (state.debug_headers(), &self.options.debug_headers) {
            // Identity headers belong to the gateway, not to policies.
            let traceparent = HeaderName::from_static(TRACEPARENT_HEADER);
            let reserved = [&self.options.request_id_header, &traceparent, &opts.trace_header];
            for (name, value) in debug.collected() {
                match HeaderName::from_bytes(name.as_bytes()) {
                    Ok(name) if reserved.contains(&&name) => {
                        tracing::warn!(header = %name, "skipping debug header that shadows a gateway header");
                    }
                    Ok(name) => insert(headers, name, value),
                    Err(_) => tracing::warn!(header = name, "skipping invalid debug header name"),
                }
            }

            if state.is_tracing() {
                let trace = PolicyTrace {
                    request_id: ctx.request_id().to_string(),
                    trace_id: ctx.trace_id().to_string(),
                    route: ctx.route().to_string(),
                    total_ms: elapsed.as_secs_f64() * 1000.0,
                    entries: state.recorder().trace_entries(),
                };
                match serde_json::to_string(&trace) {
                    Ok(json) => insert(headers, opts.trace_header.clone(), &json),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize policy trace"),
                }
            }
        }

        if self.options.server_timing {
            let value = server_timing(&state.timings(), elapsed.as_secs_f64() * 1000.0);
            insert(headers, SERVER_TIMING, &value);
        }

        stoma_telemetry::metrics::record_request(ctx.route(), response.status().as_u16(), elapsed);
        tracing::debug!(
            request_id = %ctx.request_id(),
            route = ctx.route(),
            http.status_code = response.status().as_u16(),
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "request completed"
        );
    }
}

impl Default for ContextInjector {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}

fn insert(headers: &mut http::HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "skipping invalid header value"),
    }
}

/// Renders self-times as a `Server-Timing` value, outermost first.
fn server_timing(timings: &[crate::recorder::PolicyTiming], total_ms: f64) -> String {
    let mut value = String::new();
    for timing in self_times(timings) {
        let _ = write!(value, "{};dur={:.3}, ", timing.name, timing.duration_ms);
    }
    let _ = write!(value, "total;dur={total_ms:.3}");
    value
}
