//! Driving the evaluate surface for non-HTTP runtimes.
//!
//! A gRPC filter or WebSocket runtime builds a [`PolicyInput`] from its
//! native message and hands it to an [`EvaluationRunner`]:
//!
//! ```rust,ignore
//! let runner = gateway.route("/orders").unwrap().evaluation_runner();
//! let ctx = EvalContext::new(RequestId::new(), generate_trace_id());
//! let outcome = runner.evaluate(&input, &ctx).await;
//!
//! match outcome.result {
//!     PolicyResult::Continue { .. } => forward(apply(outcome.mutations)),
//!     PolicyResult::Reject(err) => deny(err),
//!     PolicyResult::ImmediateResponse(resp) => respond(resp),
//! }
//! ```

use crate::adapter::RuntimeAdapter;
use crate::logger::{DebugLogger, DebugLoggerFactory};
use crate::policy::Policy;
use crate::trace::TraceReporter;
use std::fmt;
use std::sync::Arc;
use stoma_core::{Attributes, Mutation, PolicyInput, PolicyResult, RequestId};

/// The minimal context an evaluate call receives.
#[derive(Clone)]
pub struct EvalContext {
    request_id: RequestId,
    trace_id: String,
    logger: DebugLogger,
    reporter: TraceReporter,
    adapter: Option<Arc<dyn RuntimeAdapter>>,
}

impl EvalContext {
    /// Creates a context with a no-op logger and reporter and no adapter.
    #[must_use]
    pub const fn new(request_id: RequestId, trace_id: String) -> Self {
        Self {
            request_id,
            trace_id,
            logger: DebugLogger::NOOP,
            reporter: TraceReporter::NOOP,
            adapter: None,
        }
    }

    /// Sets the debug logger.
    #[must_use]
    pub fn with_logger(mut self, logger: DebugLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the trace reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: TraceReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Sets the runtime adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Option<Arc<dyn RuntimeAdapter>>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the trace ID.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Returns the debug logger.
    #[must_use]
    pub const fn logger(&self) -> &DebugLogger {
        &self.logger
    }

    /// Returns the trace reporter.
    #[must_use]
    pub const fn reporter(&self) -> &TraceReporter {
        &self.reporter
    }

    /// Returns the runtime adapter, if any.
    #[must_use]
    pub fn adapter(&self) -> Option<&Arc<dyn RuntimeAdapter>> {
        self.adapter.as_ref()
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("request_id", &self.request_id)
            .field("trace_id", &self.trace_id)
            .field("logger", &self.logger)
            .field("reporter", &self.reporter)
            .field("adapter", &self.adapter.is_some())
            .finish()
    }
}

/// What a full evaluation pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    /// The terminal result. `continue` carries every accumulated mutation.
    pub result: PolicyResult,
    /// Mutations from every policy that continued, in order.
    pub mutations: Vec<Mutation>,
    /// Attributes after all applied mutations.
    pub attributes: Attributes,
    /// The policy that rejected or answered, if any.
    pub decided_by: Option<String>,
    /// Policies whose evaluate was invoked, in order.
    pub evaluated: Vec<String>,
}

impl EvaluationOutcome {
    /// Returns true if every policy continued.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        self.result.is_continue()
    }
}

/// Runs a chain's evaluate surfaces in order.
#[derive(Clone, Default)]
pub struct EvaluationRunner {
    policies: Vec<Policy>,
    loggers: DebugLoggerFactory,
}

impl EvaluationRunner {
    /// Creates a runner over an already merged and sorted chain.
    #[must_use]
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            policies,
            loggers: DebugLoggerFactory::default(),
        }
    }

    /// Hands out per-policy debug loggers from `loggers`.
    #[must_use]
    pub fn with_loggers(mut self, loggers: DebugLoggerFactory) -> Self {
        self.loggers = loggers;
        self
    }

    /// Evaluates `input` against every applicable policy.
    ///
    /// A policy is invoked when it is not `http_only`, declares the input's
    /// phase, is not bypassed by its skip predicate, and has an evaluator
    /// whose hook for the input's direction is implemented. Mutations from `continue` are applied to a working
    /// copy, so later policies observe earlier changes. The first `reject`
    /// or `immediate-response` stops evaluation.
    pub async fn evaluate(&self, input: &PolicyInput, base: &EvalContext) -> EvaluationOutcome {
        let mut working = input.clone();
        let mut mutations = Vec::new();
        let mut evaluated = Vec::new();

        for policy in &self.policies {
            if policy.is_http_only() || !policy.declares_phase(input.phase) {
                continue;
            }
            let Some(evaluator) = policy.evaluator() else {
                continue;
            };

            let snapshot = working.clone();
            if let Some(skip) = policy.skip_predicate() {
                if skip.should_skip(&snapshot).await {
                    continue;
                }
            }

            let ctx = base.clone().with_logger(self.loggers.logger(policy.name()));
            let hook = if input.phase.is_request() {
                evaluator.on_request(&snapshot, &ctx)
            } else {
                evaluator.on_response(&snapshot, &ctx)
            };
            let Some(evaluation) = hook else {
                continue;
            };

            evaluated.push(policy.name().to_string());
            let result = evaluation.await;
            match result {
                PolicyResult::Continue { mutations: applied } => {
                    working = working.advanced(&applied);
                    mutations.extend(applied);
                }
                terminal => {
                    tracing::debug!(policy = policy.name(), phase = %input.phase, "evaluation stopped");
                    return EvaluationOutcome {
                        result: terminal,
                        mutations,
                        attributes: working.attributes,
                        decided_by: Some(policy.name().to_string()),
                        evaluated,
                    };
                }
            }
        }

        EvaluationOutcome {
            result: PolicyResult::pass_with(mutations.clone()),
            mutations,
            attributes: working.attributes,
            decided_by: None,
            evaluated,
        }
    }

    /// Number of policies in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl fmt::Debug for EvaluationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationRunner")
            .field("policies", &self.policies.iter().map(Policy::name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyEvaluator;
    use crate::types::BoxFuture;
    use http::Method;
    use serde_json::json;
    use stoma_core::{GatewayError, Phase, Protocol};

    struct Tagger;

    impl PolicyEvaluator for Tagger {
        fn on_request<'a>(
            &'a self,
            _input: &'a PolicyInput,
            _ctx: &'a EvalContext,
        ) -> Option<BoxFuture<'a, PolicyResult>> {
            Some(Box::pin(async {
                PolicyResult::pass_with(vec![
                    Mutation::set_header("x-tenant", "acme"),
                    Mutation::attribute("tenant", "acme"),
                ])
            }))
        }
    }

    /// Rejects unless an earlier policy set the tenant header.
    struct RequireTenant;

    impl PolicyEvaluator for RequireTenant {
        fn on_request<'a>(
            &'a self,
            input: &'a PolicyInput,
            _ctx: &'a EvalContext,
        ) -> Option<BoxFuture<'a, PolicyResult>> {
            Some(Box::pin(async move {
                if input.header("x-tenant").is_some() {
                    PolicyResult::pass()
                } else {
                    GatewayError::forbidden("tenant required").into()
                }
            }))
        }
    }

    struct ResponseOnly;

    impl PolicyEvaluator for ResponseOnly {
        fn on_response<'a>(
            &'a self,
            _input: &'a PolicyInput,
            _ctx: &'a EvalContext,
        ) -> Option<BoxFuture<'a, PolicyResult>> {
            Some(Box::pin(async { PolicyResult::pass_with(vec![Mutation::remove_header("server")]) }))
        }
    }

    fn input(phase: Phase) -> PolicyInput {
        PolicyInput::new(phase, Method::GET, "/orders", Protocol::Grpc)
    }

    fn ctx() -> EvalContext {
        EvalContext::new(RequestId::new(), stoma_core::trace_context::generate_trace_id())
    }

    #[tokio::test]
    async fn test_later_policies_see_earlier_mutations() {
        let runner = EvaluationRunner::new(vec![
            Policy::from_evaluator("tagger", 0, Tagger),
            Policy::from_evaluator("require-tenant", 1, RequireTenant),
        ]);

        let outcome = runner.evaluate(&input(Phase::RequestHeaders), &ctx()).await;

        assert!(outcome.is_continue());
        assert_eq!(outcome.mutations.len(), 2);
        assert_eq!(outcome.attributes["tenant"], json!("acme"));
        assert_eq!(outcome.evaluated, vec!["tagger", "require-tenant"]);
    }

    #[tokio::test]
    async fn test_first_reject_stops() {
        let runner = EvaluationRunner::new(vec![
            Policy::from_evaluator("require-tenant", 0, RequireTenant),
            Policy::from_evaluator("tagger", 1, Tagger),
        ]);

        let outcome = runner.evaluate(&input(Phase::RequestHeaders), &ctx()).await;

        assert!(outcome.result.is_reject());
        assert_eq!(outcome.decided_by.as_deref(), Some("require-tenant"));
        assert_eq!(outcome.evaluated, vec!["require-tenant"]);
        assert!(outcome.mutations.is_empty());
    }

    #[tokio::test]
    async fn test_skips_http_only_undeclared_phase_and_missing_hooks() {
        let runner = EvaluationRunner::new(vec![
            Policy::from_evaluator("http-only", 0, RequireTenant).http_only(),
            Policy::from_evaluator("body-only", 1, RequireTenant).with_phases([Phase::RequestBody]),
            Policy::from_evaluator("response-only", 2, ResponseOnly),
        ]);

        let outcome = runner.evaluate(&input(Phase::RequestHeaders), &ctx()).await;
        assert!(outcome.is_continue());
        assert!(outcome.evaluated.is_empty());

        let outcome = runner.evaluate(&input(Phase::ResponseHeaders), &ctx()).await;
        assert_eq!(outcome.evaluated, vec!["response-only"]);
        assert_eq!(outcome.mutations, vec![Mutation::remove_header("server")]);
    }

    #[tokio::test]
    async fn test_skip_predicate_bypasses_policy() {
        let runner = EvaluationRunner::new(vec![
            Policy::from_evaluator("require-tenant", 0, RequireTenant).skip_if(|input| input.path == "/orders"),
        ]);

        let outcome = runner.evaluate(&input(Phase::RequestHeaders), &ctx()).await;
        assert!(outcome.is_continue());
        assert!(outcome.evaluated.is_empty());

        let other = PolicyInput::new(Phase::RequestHeaders, Method::GET, "/admin", Protocol::Grpc);
        let outcome = runner.evaluate(&other, &ctx()).await;
        assert!(outcome.result.is_reject());
    }

    #[tokio::test]
    async fn test_empty_runner_continues() {
        let runner = EvaluationRunner::default();
        assert!(runner.is_empty());
        let outcome = runner.evaluate(&input(Phase::RequestHeaders), &ctx()).await;
        assert_eq!(outcome.result, PolicyResult::pass());
    }
}
