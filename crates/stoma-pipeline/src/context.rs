//! Per-request context and state.
//!
//! The [`ContextInjector`](crate::ContextInjector) creates one
//! [`RequestState`] per request and threads it through every policy by
//! mutable reference. It holds:
//!
//! - the read-only [`PolicyContext`] (identity, trace propagation, route)
//! - debug-header state, present only when the client opted in
//! - the timing/trace recorder
//! - cross-policy attributes and typed extensions

use crate::adapter::RuntimeAdapter;
use crate::debug::DebugHeaders;
use crate::evaluate::EvalContext;
use crate::logger::{DebugLogger, DebugLoggerFactory};
use crate::recorder::{PolicyTiming, Recorder};
use crate::trace::TraceReporter;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stoma_core::{Attributes, RequestId, TraceFlags};

/// Read-only per-request context.
#[derive(Clone)]
pub struct PolicyContext {
    pub(crate) request_id: RequestId,
    pub(crate) started_at: Instant,
    pub(crate) gateway_name: Arc<str>,
    pub(crate) route: Arc<str>,
    pub(crate) trace_id: String,
    pub(crate) span_id: String,
    pub(crate) parent_span_id: Option<String>,
    pub(crate) trace_flags: TraceFlags,
    pub(crate) loggers: DebugLoggerFactory,
    pub(crate) adapter: Option<Arc<dyn RuntimeAdapter>>,
}

impl PolicyContext {
    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns when the request started processing.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the gateway name.
    #[must_use]
    pub fn gateway_name(&self) -> &str {
        &self.gateway_name
    }

    /// Returns the matched route.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Returns the distributed trace ID (32 hex chars).
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Returns this hop's span ID (16 hex chars).
    #[must_use]
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Returns the caller's span ID, when an inbound trace was continued.
    #[must_use]
    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    /// Returns the trace flags propagated outbound.
    #[must_use]
    pub const fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Returns the debug logger for a policy.
    #[must_use]
    pub fn debug_logger(&self, policy: &str) -> DebugLogger {
        self.loggers.logger(policy)
    }

    /// Returns the runtime adapter, if the host provided one.
    #[must_use]
    pub fn adapter(&self) -> Option<&Arc<dyn RuntimeAdapter>> {
        self.adapter.as_ref()
    }
}

impl fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyContext")
            .field("request_id", &self.request_id)
            .field("gateway_name", &self.gateway_name)
            .field("route", &self.route)
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_span_id", &self.parent_span_id)
            .field("trace_flags", &self.trace_flags)
            .field("adapter", &self.adapter.is_some())
            .finish_non_exhaustive()
    }
}

/// Mutable state threaded through the policy chain.
pub struct RequestState {
    context: PolicyContext,
    debug: Option<DebugHeaders>,
    recorder: Recorder,
    attributes: Attributes,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestState {
    pub(crate) fn new(context: PolicyContext, debug: Option<DebugHeaders>) -> Self {
        let tracing = debug.as_ref().is_some_and(DebugHeaders::trace_requested);
        Self {
            context,
            debug,
            recorder: Recorder::new(tracing),
            attributes: Attributes::new(),
            extensions: HashMap::new(),
        }
    }

    /// Returns the read-only policy context.
    #[must_use]
    pub const fn context(&self) -> &PolicyContext {
        &self.context
    }

    /// Offers a debug header value.
    ///
    /// A single lookup and no-op unless the client requested `name`.
    /// Numbers and booleans render as their literal text. Last write wins.
    pub fn set_debug_header(&mut self, name: &str, value: impl fmt::Display) {
        if let Some(debug) = &mut self.debug {
            if debug.accepts(name) {
                debug.store(name, value.to_string());
            }
        }
    }

    /// Returns true if the client requested any debug output.
    #[must_use]
    pub const fn is_debug_requested(&self) -> bool {
        self.debug.is_some()
    }

    /// Returns the debug-header state, if active.
    #[must_use]
    pub const fn debug_headers(&self) -> Option<&DebugHeaders> {
        self.debug.as_ref()
    }

    /// Returns the trace reporter for a policy.
    ///
    /// [`TraceReporter::NOOP`] unless tracing is active for this request.
    #[must_use]
    pub fn policy_trace(&self, policy: &str) -> TraceReporter {
        if self.recorder.is_tracing() {
            TraceReporter::new(self.recorder.clone(), Arc::from(policy))
        } else {
            TraceReporter::NOOP
        }
    }

    /// Returns true if a policy trace is being collected.
    #[must_use]
    pub fn is_tracing(&self) -> bool {
        self.recorder.is_tracing()
    }

    /// Returns the debug logger for a policy.
    #[must_use]
    pub fn debug_logger(&self, policy: &str) -> DebugLogger {
        self.context.debug_logger(policy)
    }

    /// Inclusive policy timings recorded so far, innermost first.
    #[must_use]
    pub fn timings(&self) -> Vec<PolicyTiming> {
        self.recorder.timings()
    }

    pub(crate) const fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Builds the evaluation context a policy's evaluate surface receives.
    #[must_use]
    pub fn eval_context(&self, policy: &str) -> EvalContext {
        EvalContext::new(self.context.request_id, self.context.trace_id.clone())
            .with_logger(self.debug_logger(policy))
            .with_reporter(self.policy_trace(policy))
            .with_adapter(self.context.adapter.clone())
    }

    /// Returns the cross-policy attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the cross-policy attributes mutably.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Stores a typed extension value.
    ///
    /// ```
    /// # use stoma_pipeline::RequestState;
    /// #[derive(Clone)]
    /// struct RateLimitInfo {
    ///     remaining: u32,
    /// }
    ///
    /// let mut state = RequestState::detached("/users");
    /// state.set_extension(RateLimitInfo { remaining: 100 });
    /// assert_eq!(state.get_extension::<RateLimitInfo>().unwrap().remaining, 100);
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Creates state outside a pipeline, with default options and no
    /// debug output. Useful for unit-testing policies.
    #[must_use]
    pub fn detached(route: &str) -> Self {
        let context = PolicyContext {
            request_id: RequestId::new(),
            started_at: Instant::now(),
            gateway_name: Arc::from(crate::injector::DEFAULT_GATEWAY_NAME),
            route: Arc::from(route),
            trace_id: stoma_core::trace_context::generate_trace_id(),
            span_id: stoma_core::trace_context::generate_span_id(),
            parent_span_id: None,
            trace_flags: TraceFlags::default(),
            loggers: DebugLoggerFactory::default(),
            adapter: None,
        };
        Self::new(context, None)
    }
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestState")
            .field("context", &self.context)
            .field("debug", &self.debug)
            .field("tracing", &self.recorder.is_tracing())
            .field("attributes", &self.attributes)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
