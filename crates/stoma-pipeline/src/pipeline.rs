//! A compiled route: context injection, the policy chain, the error
//! boundary, and finalization.

use crate::boundary::{error_response, panic_response};
use crate::compiler::{compile, CompiledChain, Upstream};
use crate::context::RequestState;
use crate::evaluate::EvaluationRunner;
use crate::injector::{ContextInjector, PipelineOptions};
use crate::policy::{Policy, PolicyOutcome};
use crate::types::{BoxFuture, Request, Response};
use futures_util::FutureExt;
use http::StatusCode;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use stoma_core::GatewayError;

/// One route's executable pipeline.
///
/// Built once; every request runs the same compiled chain.
#[derive(Clone)]
pub struct Pipeline {
    route: Arc<str>,
    policies: Vec<Policy>,
    chain: CompiledChain,
    upstream: Arc<dyn Upstream>,
    injector: ContextInjector,
}

impl Pipeline {
    /// Starts building a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Handles a request.
    ///
    /// Never fails: policy errors and panics become error envelopes, and the
    /// identity headers are written onto every response.
    pub async fn handle(&self, request: Request) -> Response {
        let mut state = self.injector.prepare(&self.route, &request);
        let request_id = state.context().request_id();
        let recorder = state.recorder().clone();

        let outcome = {
            let run = AssertUnwindSafe(self.chain.run(&mut state, request, self.upstream.as_ref())).catch_unwind();
            let mut run = pin!(run);
            let outcome = run.as_mut().await;
            if outcome.is_err() {
                recorder.mark_panicked();
            }
            outcome
        };

        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => error_response(&err, Some(request_id)),
            Err(payload) => panic_response(payload.as_ref(), request_id),
        };

        self.injector.finalize(&state, &mut response);
        response
    }

    /// Returns the route this pipeline serves.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Policy names in execution order.
    #[must_use]
    pub fn policy_names(&self) -> Vec<&str> {
        self.chain.names()
    }

    /// Returns the merged, sorted policies.
    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Returns the compiled chain.
    #[must_use]
    pub const fn chain(&self) -> &CompiledChain {
        &self.chain
    }

    /// Returns the context injector.
    #[must_use]
    pub const fn injector(&self) -> &ContextInjector {
        &self.injector
    }

    /// Returns a runner for the evaluate surface of this route's policies.
    #[must_use]
    pub fn evaluation_runner(&self) -> EvaluationRunner {
        EvaluationRunner::new(self.policies.clone()).with_loggers(self.injector.loggers().clone())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("route", &self.route)
            .field("chain", &self.chain)
            .field("options", self.injector.options())
            .finish_non_exhaustive()
    }
}

/// Answers every request with a 502 when no upstream was configured.
struct NoUpstream;

impl Upstream for NoUpstream {
    fn call<'a>(&'a self, _state: &'a mut RequestState, _request: Request) -> BoxFuture<'a, PolicyOutcome> {
        let err = GatewayError::new(StatusCode::BAD_GATEWAY, "no_upstream", "No upstream configured");
        let outcome: PolicyOutcome = Err(err.into());
        Box::pin(std::future::ready(outcome))
    }
}

/// Builder for [`Pipeline`].
///
/// The policy list given here is compiled as is. Use
/// [`build_policy_chain`](crate::build_policy_chain) or a
/// [`GatewayBuilder`](crate::GatewayBuilder) to merge and sort first.
pub struct PipelineBuilder {
    route: Arc<str>,
    options: PipelineOptions,
    policies: Vec<Policy>,
    upstream: Option<Arc<dyn Upstream>>,
}

impl PipelineBuilder {
    /// Creates a builder for route `/`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            route: Arc::from("/"),
            options: PipelineOptions::default(),
            policies: Vec::new(),
            upstream: None,
        }
    }

    /// Sets the route label.
    #[must_use]
    pub fn route(mut self, route: impl Into<Arc<str>>) -> Self {
        self.route = route.into();
        self
    }

    /// Sets the pipeline options.
    #[must_use]
    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the ordered policy list.
    #[must_use]
    pub fn policies(mut self, policies: Vec<Policy>) -> Self {
        self.policies = policies;
        self
    }

    /// Appends one policy.
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Sets the upstream.
    #[must_use]
    pub fn upstream(mut self, upstream: impl Upstream) -> Self {
        self.upstream = Some(Arc::new(upstream));
        self
    }

    /// Sets an already shared upstream.
    #[must_use]
    pub fn shared_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Compiles the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let chain = compile(&self.policies);
        tracing::debug!(route = %self.route, policies = ?chain.names(), "pipeline compiled");

        Pipeline {
            route: self.route,
            policies: self.policies,
            chain,
            upstream: self.upstream.unwrap_or_else(|| Arc::new(NoUpstream)),
            injector: ContextInjector::new(self.options),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
