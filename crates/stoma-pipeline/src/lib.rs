//! # Stoma Pipeline
//!
//! The policy pipeline at the core of the Stoma edge gateway.
//!
//! Policies are named, prioritized units of gateway behaviour (auth, rate
//! limiting, caching, transformation). Global and route policies are merged
//! by name, sorted by priority, and compiled once into an onion-style chain.
//! Every request then runs:
//!
//! ```text
//! prepare (identity, traceparent, debug opt-in)
//!    │
//!    ▼
//! policy 0 ─► policy 1 ─► ... ─► upstream
//!    │                              │
//!    ◄──────────── response ◄───────┘
//!    │
//! error boundary (errors and panics → JSON envelope)
//!    │
//!    ▼
//! finalize (request id, traceparent, debug headers, trace, Server-Timing)
//! ```
//!
//! ## Key Features
//!
//! - **Deterministic order**: lower priority runs first, ties keep merge
//!   order, route policies replace same-named globals
//! - **Timing on every exit path**: inclusive per-policy durations, with
//!   `panicked` or `cancelled` recorded for steps that never returned
//! - **Opt-in debug output**: clients request named debug headers and a
//!   structured policy trace, gated by an operator allowlist
//! - **Two execution surfaces**: an HTTP handler and a protocol-agnostic
//!   evaluate contract for gRPC and WebSocket runtimes
//!
//! ## Example
//!
//! ```
//! use stoma_pipeline::{policy_fn, priority, upstream_fn, GatewayBuilder, Policy, PolicyOutcome, Response, ResponseExt, RouteDefinition};
//! use http::StatusCode;
//!
//! let auth = Policy::new(
//!     "auth",
//!     priority::AUTH,
//!     policy_fn(|state, request, next| {
//!         Box::pin(async move {
//!             state.set_debug_header("x-stoma-auth", "anonymous");
//!             next.run(state, request).await
//!         })
//!     }),
//! );
//!
//! let gateway = GatewayBuilder::new()
//!     .global_policy(auth)
//!     .route(RouteDefinition::new(
//!         "/orders",
//!         upstream_fn(|_request| async {
//!             let outcome: PolicyOutcome = Ok(Response::text(StatusCode::OK, "[]"));
//!             outcome
//!         }),
//!     ))
//!     .build()
//!     .unwrap();
//!
//! assert!(gateway.route("/orders").is_some());
//! ```

#![doc(html_root_url = "https://docs.rs/stoma-pipeline/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod adapter;
pub mod boundary;
pub mod bridge;
pub mod chain;
pub mod compiler;
pub mod context;
pub mod debug;
pub mod evaluate;
pub mod gateway;
pub mod injector;
pub mod logger;
pub mod pipeline;
pub mod policy;
mod recorder;
pub mod trace;
pub mod types;

// Re-export main types at crate root
pub use adapter::{typed_store, RuntimeAdapter, StoreHandle, StoreKind, TokioAdapter};
pub use boundary::{error_response, panic_response};
pub use chain::build_policy_chain;
pub use compiler::{compile, upstream_fn, CompiledChain, FnUpstream, Next, Upstream};
pub use context::{PolicyContext, RequestState};
pub use debug::{DebugHeaders, Requested};
pub use evaluate::{EvalContext, EvaluationOutcome, EvaluationRunner};
pub use gateway::{Gateway, GatewayBuildError, GatewayBuilder, RouteDefinition, UNMATCHED_ROUTE};
pub use injector::{ContextInjector, DebugHeaderOptions, PipelineOptions, DEFAULT_GATEWAY_NAME};
pub use logger::{DebugLogger, DebugLoggerFactory};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policy::{policy_fn, priority, FnPolicy, Policy, PolicyEvaluator, PolicyHandler, PolicyOutcome, SkipPredicate};
pub use recorder::{self_times, PolicyTiming};
pub use trace::{PolicyTrace, PolicyTraceEntry, TraceDetail, TraceReporter};
pub use types::{BoxFuture, Request, Response, ResponseExt};
