//! The policy shape and its two execution surfaces.
//!
//! A [`Policy`] is a named, prioritized unit of gateway behaviour. It can
//! expose:
//!
//! - an HTTP surface, [`PolicyHandler`]: wrap-and-continue, onion style
//! - an evaluate surface, [`PolicyEvaluator`]: pure input → result, for
//!   runtimes that are not native HTTP
//!
//! A policy built with [`Policy::dual`] shares one value for both surfaces,
//! which is how parity between them is kept. A policy built with
//! [`Policy::from_evaluator`] gets its HTTP surface derived from evaluate.
//!
//! # Example
//!
//! ```ignore
//! use stoma_pipeline::{BoxFuture, Next, Policy, PolicyHandler, PolicyOutcome, Request, RequestState};
//!
//! struct ServerHeader;
//!
//! impl PolicyHandler for ServerHeader {
//!     fn handle<'a>(
//!         &'a self,
//!         state: &'a mut RequestState,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, PolicyOutcome> {
//!         Box::pin(async move {
//!             let mut response = next.run(state, request).await?;
//!             response.headers_mut().insert("server", "stoma".parse().unwrap());
//!             Ok(response)
//!         })
//!     }
//! }
//!
//! let policy = Policy::new("server-header", 90, ServerHeader);
//! ```

use crate::bridge;
use crate::compiler::Next;
use crate::context::RequestState;
use crate::evaluate::EvalContext;
use crate::types::{BoxFuture, Request, Response};
use std::fmt;
use std::sync::Arc;
use stoma_core::{Phase, PipelineError, PolicyInput, PolicyResult};

/// What an HTTP-surface policy produces.
pub type PolicyOutcome = Result<Response, PipelineError>;

/// Well-known priority bands. Lower runs first.
pub mod priority {
    /// Request logging and other outermost observers.
    pub const OBSERVABILITY: i32 = 0;
    /// IP filtering and other cheap early rejections.
    pub const IP_FILTER: i32 = 5;
    /// Authentication.
    pub const AUTH: i32 = 10;
    /// Rate limiting.
    pub const RATE_LIMIT: i32 = 20;
    /// Circuit breaking.
    pub const CIRCUIT_BREAKER: i32 = 30;
    /// Response caching.
    pub const CACHE: i32 = 40;
    /// Request and response transforms.
    pub const TRANSFORM: i32 = 50;
    /// Timeouts and retries, closest to the upstream.
    pub const RESILIENCE: i32 = 90;
    /// Default priority.
    pub const DEFAULT: i32 = 100;
}

/// The HTTP execution surface.
///
/// A handler may do work, call `next.run()` at most once to continue, and
/// post-process the response. Returning without calling `next` stops the
/// chain.
pub trait PolicyHandler: Send + Sync + 'static {
    /// Processes the request.
    fn handle<'a>(
        &'a self,
        state: &'a mut RequestState,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PolicyOutcome>;
}

/// The evaluate execution surface.
///
/// Both hooks are optional. A hook returning `None` is not implemented,
/// and runtimes skip it rather than guessing.
pub trait PolicyEvaluator: Send + Sync + 'static {
    /// Evaluates a request-side input.
    fn on_request<'a>(
        &'a self,
        _input: &'a PolicyInput,
        _ctx: &'a EvalContext,
    ) -> Option<BoxFuture<'a, PolicyResult>> {
        None
    }

    /// Evaluates a response-side input.
    fn on_response<'a>(
        &'a self,
        _input: &'a PolicyInput,
        _ctx: &'a EvalContext,
    ) -> Option<BoxFuture<'a, PolicyResult>> {
        None
    }
}

/// A handler built from a closure.
pub struct FnPolicy<F> {
    func: F,
}

/// Creates a [`PolicyHandler`] from a closure.
///
/// ```ignore
/// let handler = policy_fn(|state, request, next| {
///     Box::pin(async move {
///         state.set_debug_header("x-seen", true);
///         next.run(state, request).await
///     })
/// });
/// ```
pub const fn policy_fn<F>(func: F) -> FnPolicy<F>
where
    F: for<'a> Fn(&'a mut RequestState, Request, Next<'a>) -> BoxFuture<'a, PolicyOutcome>
        + Send
        + Sync
        + 'static,
{
    FnPolicy { func }
}

impl<F> PolicyHandler for FnPolicy<F>
where
    F: for<'a> Fn(&'a mut RequestState, Request, Next<'a>) -> BoxFuture<'a, PolicyOutcome>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        state: &'a mut RequestState,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PolicyOutcome> {
        (self.func)(state, request, next)
    }
}

/// Decides before a policy's own logic whether to bypass it.
///
/// Predicates see the protocol-agnostic [`PolicyInput`], so the HTTP chain
/// and the [`EvaluationRunner`](crate::EvaluationRunner) bypass the same
/// inputs. On HTTP the input is built from the request headers.
#[derive(Clone)]
pub enum SkipPredicate {
    /// Resolved synchronously.
    Sync(Arc<dyn Fn(&PolicyInput) -> bool + Send + Sync>),
    /// Resolved asynchronously.
    Async(Arc<dyn Fn(&PolicyInput) -> BoxFuture<'static, bool> + Send + Sync>),
}

impl SkipPredicate {
    pub(crate) async fn should_skip(&self, input: &PolicyInput) -> bool {
        match self {
            Self::Sync(predicate) => predicate(input),
            Self::Async(predicate) => predicate(input).await,
        }
    }
}

impl fmt::Debug for SkipPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("SkipPredicate::Sync"),
            Self::Async(_) => f.write_str("SkipPredicate::Async"),
        }
    }
}

/// A named, prioritized policy.
///
/// Immutable once constructed; cheap to clone.
#[derive(Clone)]
pub struct Policy {
    name: Arc<str>,
    priority: i32,
    handler: Option<Arc<dyn PolicyHandler>>,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    phases: Option<Vec<Phase>>,
    http_only: bool,
    skip: Option<SkipPredicate>,
}

impl Policy {
    /// Creates an HTTP-only-surface policy.
    pub fn new(name: impl Into<Arc<str>>, priority: i32, handler: impl PolicyHandler) -> Self {
        Self {
            name: name.into(),
            priority,
            handler: Some(Arc::new(handler)),
            evaluator: None,
            phases: None,
            http_only: false,
            skip: None,
        }
    }

    /// Creates a policy whose single value implements both surfaces.
    pub fn dual<P>(name: impl Into<Arc<str>>, priority: i32, policy: P) -> Self
    where
        P: PolicyHandler + PolicyEvaluator,
    {
        let shared = Arc::new(policy);
        let handler: Arc<dyn PolicyHandler> = shared.clone();
        let evaluator: Arc<dyn PolicyEvaluator> = shared;
        Self {
            name: name.into(),
            priority,
            handler: Some(handler),
            evaluator: Some(evaluator),
            phases: None,
            http_only: false,
            skip: None,
        }
    }

    /// Creates a policy from an evaluator alone.
    ///
    /// Its HTTP surface runs evaluate for each declared phase the HTTP
    /// runtime can observe (headers and bodies) and applies the result.
    pub fn from_evaluator(
        name: impl Into<Arc<str>>,
        priority: i32,
        evaluator: impl PolicyEvaluator,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            handler: None,
            evaluator: Some(Arc::new(evaluator)),
            phases: None,
            http_only: false,
            skip: None,
        }
    }

    /// Declares the phases this policy's evaluate surface is invoked for.
    #[must_use]
    pub fn with_phases(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.phases = Some(phases.into_iter().collect());
        self
    }

    /// Marks the policy as meaningful only on native HTTP.
    #[must_use]
    pub const fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Bypasses the policy when `predicate` returns true.
    ///
    /// ```
    /// use stoma_pipeline::{policy_fn, Policy};
    ///
    /// let policy = Policy::new(
    ///     "auth",
    ///     10,
    ///     policy_fn(|state, request, next| Box::pin(next.run(state, request))),
    /// )
    /// .skip_if(|input| input.path == "/health");
    /// assert!(policy.skip_predicate().is_some());
    /// ```
    #[must_use]
    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyInput) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(SkipPredicate::Sync(Arc::new(predicate)));
        self
    }

    /// Bypasses the policy when the async `predicate` resolves to true.
    #[must_use]
    pub fn skip_if_async<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyInput) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        self.skip = Some(SkipPredicate::Async(Arc::new(predicate)));
        self
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the evaluate surface, if any.
    #[must_use]
    pub fn evaluator(&self) -> Option<&Arc<dyn PolicyEvaluator>> {
        self.evaluator.as_ref()
    }

    /// Returns true if the policy has an explicit HTTP handler.
    #[must_use]
    pub const fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Returns the declared phases, or the defaults.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        self.phases.as_deref().unwrap_or(&Phase::DEFAULT)
    }

    /// Returns true if evaluate should be invoked for `phase`.
    #[must_use]
    pub fn declares_phase(&self, phase: Phase) -> bool {
        self.phases().contains(&phase)
    }

    /// Returns true if the policy only runs on native HTTP.
    #[must_use]
    pub const fn is_http_only(&self) -> bool {
        self.http_only
    }

    /// Returns the skip predicate, if any.
    #[must_use]
    pub const fn skip_predicate(&self) -> Option<&SkipPredicate> {
        self.skip.as_ref()
    }

    /// The handler the compiled chain invokes.
    ///
    /// The explicit handler if present, otherwise one derived from evaluate.
    /// The skip predicate, if any, is applied as a decorator.
    pub(crate) fn compiled_handler(&self) -> Arc<dyn PolicyHandler> {
        let base: Arc<dyn PolicyHandler> = match (&self.handler, &self.evaluator) {
            (Some(handler), _) => Arc::clone(handler),
            (None, Some(evaluator)) => Arc::new(EvaluatorHandler {
                name: Arc::clone(&self.name),
                evaluator: Arc::clone(evaluator),
                phases: self.phases().to_vec(),
            }),
            (None, None) => Arc::new(Passthrough),
        };

        match &self.skip {
            Some(predicate) => Arc::new(Skippable {
                predicate: predicate.clone(),
                inner: base,
            }),
            None => base,
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("handler", &self.handler.is_some())
            .field("evaluator", &self.evaluator.is_some())
            .field("phases", &self.phases())
            .field("http_only", &self.http_only)
            .field("skip", &self.skip)
            .finish()
    }
}

/// Runs the next step when the predicate says so, the policy otherwise.
struct Skippable {
    predicate: SkipPredicate,
    inner: Arc<dyn PolicyHandler>,
}

impl PolicyHandler for Skippable {
    fn handle<'a>(
        &'a self,
        state: &'a mut RequestState,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(async move {
            let input = bridge::input_from_request(&request, Phase::RequestHeaders, state.attributes());
            if self.predicate.should_skip(&input).await {
                return next.run(state, request).await;
            }
            self.inner.handle(state, request, next).await
        })
    }
}

struct Passthrough;

impl PolicyHandler for Passthrough {
    fn handle<'a>(
        &'a self,
        state: &'a mut RequestState,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(next.run(state, request))
    }
}

/// HTTP surface derived from an evaluator.
struct EvaluatorHandler {
    name: Arc<str>,
    evaluator: Arc<dyn PolicyEvaluator>,
    phases: Vec<Phase>,
}

impl PolicyHandler for EvaluatorHandler {
    fn handle<'a>(
        &'a self,
        state: &'a mut RequestState,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(async move {
            let ctx = state.eval_context(&self.name);
            let mut request = request;

            for phase in [Phase::RequestHeaders, Phase::RequestBody] {
                if !self.phases.contains(&phase) {
                    continue;
                }
                let input = if phase == Phase::RequestBody {
                    let (buffered, body) = bridge::buffer_request(request).await;
                    request = buffered;
                    bridge::input_from_request(&request, phase, state.attributes()).with_body(body)
                } else {
                    bridge::input_from_request(&request, phase, state.attributes())
                };
                let Some(evaluation) = self.evaluator.on_request(&input, &ctx) else {
                    break;
                };
                match evaluation.await {
                    PolicyResult::Continue { mutations } => {
                        bridge::apply_request_mutations(&mut request, &mutations, state.attributes_mut());
                    }
                    PolicyResult::Reject(err) => return Err(err.into()),
                    PolicyResult::ImmediateResponse(immediate) => {
                        return Ok(bridge::immediate_response(immediate));
                    }
                }
            }

            let request_line =
                bridge::input_from_request(&request, Phase::ResponseHeaders, state.attributes());
            let mut response = next.run(state, request).await?;

            for phase in [Phase::ResponseHeaders, Phase::ResponseBody] {
                if !self.phases.contains(&phase) {
                    continue;
                }
                let input = if phase == Phase::ResponseBody {
                    let (buffered, body) = bridge::buffer_response(response).await;
                    response = buffered;
                    bridge::input_from_response(&request_line, &response, phase, state.attributes())
                        .with_body(body)
                } else {
                    bridge::input_from_response(&request_line, &response, phase, state.attributes())
                };
                let Some(evaluation) = self.evaluator.on_response(&input, &ctx) else {
                    break;
                };
                match evaluation.await {
                    PolicyResult::Continue { mutations } => {
                        bridge::apply_response_mutations(&mut response, &mutations, state.attributes_mut());
                    }
                    PolicyResult::Reject(err) => return Err(err.into()),
                    PolicyResult::ImmediateResponse(immediate) => {
                        return Ok(bridge::immediate_response(immediate));
                    }
                }
            }

            Ok::<_, PipelineError>(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl PolicyHandler for Noop {
        fn handle<'a>(
            &'a self,
            state: &'a mut RequestState,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, PolicyOutcome> {
            Box::pin(next.run(state, request))
        }
    }

    struct OnlyRequest;

    impl PolicyEvaluator for OnlyRequest {
        fn on_request<'a>(
            &'a self,
            _input: &'a PolicyInput,
            _ctx: &'a EvalContext,
        ) -> Option<BoxFuture<'a, PolicyResult>> {
            Some(Box::pin(async { PolicyResult::pass() }))
        }
    }

    #[test]
    fn test_default_phases() {
        let policy = Policy::new("noop", 1, Noop);
        assert_eq!(policy.phases(), &Phase::DEFAULT);
        assert!(policy.declares_phase(Phase::RequestHeaders));
        assert!(policy.declares_phase(Phase::ResponseHeaders));
        assert!(!policy.declares_phase(Phase::RequestBody));
    }

    #[test]
    fn test_declared_phases() {
        let policy = Policy::from_evaluator("eval", 1, OnlyRequest).with_phases([Phase::RequestBody]);
        assert_eq!(policy.phases(), &[Phase::RequestBody]);
        assert!(!policy.has_handler());
        assert!(policy.evaluator().is_some());
    }

    #[test]
    fn test_builder_flags() {
        let policy = Policy::new("noop", 7, Noop)
            .http_only()
            .skip_if(|input| input.path == "/health");

        assert_eq!(policy.name(), "noop");
        assert_eq!(policy.priority(), 7);
        assert!(policy.is_http_only());
        assert!(matches!(policy.skip_predicate(), Some(SkipPredicate::Sync(_))));
        assert!(policy.evaluator().is_none());
    }

    #[tokio::test]
    async fn test_skip_predicates() {
        let input = PolicyInput::new(
            Phase::RequestHeaders,
            http::Method::GET,
            "/health",
            stoma_core::Protocol::Http,
        );

        let sync = SkipPredicate::Sync(Arc::new(|input: &PolicyInput| input.path == "/health"));
        assert!(sync.should_skip(&input).await);

        let asynchronous = SkipPredicate::Async(Arc::new(|_: &PolicyInput| -> BoxFuture<'static, bool> {
            Box::pin(async { false })
        }));
        assert!(!asynchronous.should_skip(&input).await);
    }

    #[tokio::test]
    async fn test_default_evaluator_hooks_are_absent() {
        struct Nothing;
        impl PolicyEvaluator for Nothing {}

        let input = PolicyInput::new(
            Phase::RequestHeaders,
            http::Method::GET,
            "/",
            stoma_core::Protocol::Grpc,
        );
        let ctx = RequestState::detached("/").eval_context("nothing");
        assert!(Nothing.on_request(&input, &ctx).is_none());
        assert!(Nothing.on_response(&input, &ctx).is_none());
        assert!(OnlyRequest.on_request(&input, &ctx).is_some());
    }
}
