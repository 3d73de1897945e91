//! Compiling an ordered policy list into an executable, timed chain.
//!
//! ```text
//!   state ──► step 0 ──► step 1 ──► ... ──► step n ──► upstream
//!               │          │                  │
//!               └── guard ─┴── guard ─ ... ───┘   (inclusive timings)
//! ```
//!
//! Each step is entered through the request's recorder, which times the
//! handler on every exit path and feeds the trace and the
//! `stoma_policy_duration_seconds` histogram. Execution order is exactly
//! the compiled order; nothing is reordered at request time.

use crate::context::RequestState;
use crate::policy::{Policy, PolicyHandler, PolicyOutcome};
use crate::types::{BoxFuture, Request};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The end of the chain: the call to the backend.
pub trait Upstream: Send + Sync + 'static {
    /// Forwards the request.
    fn call<'a>(&'a self, state: &'a mut RequestState, request: Request) -> BoxFuture<'a, PolicyOutcome>;
}

/// An upstream built from an async function of the request.
pub struct FnUpstream<F> {
    func: F,
}

/// Creates an [`Upstream`] from an async function.
///
/// ```
/// use stoma_pipeline::{upstream_fn, PolicyOutcome, Response, ResponseExt};
/// use http::StatusCode;
///
/// let upstream = upstream_fn(|_request| async {
///     let outcome: PolicyOutcome = Ok(Response::text(StatusCode::OK, "hello"));
///     outcome
/// });
/// ```
pub const fn upstream_fn<F, Fut>(func: F) -> FnUpstream<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PolicyOutcome> + Send + 'static,
{
    FnUpstream { func }
}

impl<F, Fut> Upstream for FnUpstream<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PolicyOutcome> + Send + 'static,
{
    fn call<'a>(&'a self, _state: &'a mut RequestState, request: Request) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin((self.func)(request))
    }
}

/// One compiled step.
#[derive(Clone)]
pub(crate) struct CompiledStep {
    index: usize,
    name: Arc<str>,
    priority: i32,
    handler: Arc<dyn PolicyHandler>,
}

/// An ordered, executable chain.
#[derive(Clone, Default)]
pub struct CompiledChain {
    steps: Vec<CompiledStep>,
}

/// Compiles an already merged and sorted policy list.
#[must_use]
pub fn compile(policies: &[Policy]) -> CompiledChain {
    let steps = policies
        .iter()
        .enumerate()
        .map(|(index, policy)| CompiledStep {
            index,
            name: Arc::clone(policy.name_arc()),
            priority: policy.priority(),
            handler: policy.compiled_handler(),
        })
        .collect();
    CompiledChain { steps }
}

impl CompiledChain {
    /// Runs the chain, ending at `upstream`.
    pub async fn run(&self, state: &mut RequestState, request: Request, upstream: &dyn Upstream) -> PolicyOutcome {
        Next::new(&self.steps, upstream).run(state, request).await
    }

    /// Policy names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_ref()).collect()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true for the empty (pass-through) chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for CompiledChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| (s.name.as_ref(), s.priority)))
            .finish()
    }
}

/// The rest of the chain, handed to each policy.
///
/// Consumed by [`Next::run`], so a policy can advance at most once.
/// Dropping it without running stops the chain.
pub struct Next<'a> {
    steps: &'a [CompiledStep],
    upstream: &'a dyn Upstream,
    caller: Option<usize>,
}

impl<'a> Next<'a> {
    fn new(steps: &'a [CompiledStep], upstream: &'a dyn Upstream) -> Self {
        Self {
            steps,
            upstream,
            caller: None,
        }
    }

    /// Runs the next policy, or the upstream at the end of the chain.
    pub async fn run(self, state: &mut RequestState, request: Request) -> PolicyOutcome {
        if let Some(caller) = self.caller {
            state.recorder().mark_advanced(caller);
        }

        let Some((step, rest)) = self.steps.split_first() else {
            return self.upstream.call(state, request).await;
        };

        let next = Next {
            steps: rest,
            upstream: self.upstream,
            caller: Some(step.index),
        };
        let guard = state.recorder().enter(step.index, &step.name, step.priority);
        let outcome = step.handler.handle(state, request, next).await;
        guard.finish(outcome.as_ref().err());
        outcome
    }

    /// Returns the number of policies still ahead.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.steps.len()
    }
}
