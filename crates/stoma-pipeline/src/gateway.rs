//! Assembling a gateway from global policies and a route list.
//!
//! ```
//! use stoma_pipeline::{policy_fn, upstream_fn, GatewayBuilder, Policy, PolicyOutcome, Response, ResponseExt, RouteDefinition};
//! use http::StatusCode;
//!
//! let gateway = GatewayBuilder::new()
//!     .global_policy(Policy::new(
//!         "log",
//!         0,
//!         policy_fn(|state, request, next| Box::pin(next.run(state, request))),
//!     ))
//!     .route(RouteDefinition::new(
//!         "/health",
//!         upstream_fn(|_request| async {
//!             let outcome: PolicyOutcome = Ok(Response::text(StatusCode::OK, "ok"));
//!             outcome
//!         }),
//!     ))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(gateway.route("/health").unwrap().policy_names(), ["log"]);
//! ```

use crate::chain::build_policy_chain;
use crate::compiler::Upstream;
use crate::context::RequestState;
use crate::injector::PipelineOptions;
use crate::pipeline::Pipeline;
use crate::policy::{Policy, PolicyOutcome};
use crate::types::{BoxFuture, Request, Response};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use stoma_core::GatewayError;
use thiserror::Error;

/// Route label used for requests that match no declared route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Errors detected while assembling a gateway.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayBuildError {
    /// Two policies in one list share a name.
    #[error("duplicate policy '{name}' in {scope} policies")]
    DuplicatePolicy {
        /// `global` or the route path.
        scope: String,
        /// The repeated policy name.
        name: String,
    },

    /// Two routes share a path.
    #[error("duplicate route '{path}'")]
    DuplicateRoute {
        /// The repeated path.
        path: String,
    },
}

/// A declarative route: path, route policies, and upstream.
pub struct RouteDefinition {
    path: Arc<str>,
    policies: Vec<Policy>,
    upstream: Arc<dyn Upstream>,
}

impl RouteDefinition {
    /// Creates a route with no route-level policies.
    #[must_use]
    pub fn new(path: impl Into<Arc<str>>, upstream: impl Upstream) -> Self {
        Self {
            path: path.into(),
            policies: Vec::new(),
            upstream: Arc::new(upstream),
        }
    }

    /// Adds a route-level policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Adds route-level policies.
    #[must_use]
    pub fn with_policies(mut self, policies: impl IntoIterator<Item = Policy>) -> Self {
        self.policies.extend(policies);
        self
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("path", &self.path)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Gateway`].
#[derive(Default)]
pub struct GatewayBuilder {
    options: PipelineOptions,
    global: Vec<Policy>,
    routes: Vec<RouteDefinition>,
}

impl GatewayBuilder {
    /// Creates an empty builder with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the options shared by every route.
    #[must_use]
    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a policy applied to every route.
    #[must_use]
    pub fn global_policy(mut self, policy: Policy) -> Self {
        self.global.push(policy);
        self
    }

    /// Adds a route.
    #[must_use]
    pub fn route(mut self, route: RouteDefinition) -> Self {
        self.routes.push(route);
        self
    }

    /// Merges and compiles one pipeline per route.
    ///
    /// # Errors
    ///
    /// Returns an error if a policy name repeats within the global list or
    /// within one route's list, or if two routes share a path.
    pub fn build(self) -> Result<Gateway, GatewayBuildError> {
        check_unique("global", &self.global)?;

        let mut routes = IndexMap::with_capacity(self.routes.len());
        for route in self.routes {
            check_unique(&route.path, &route.policies)?;
            if routes.contains_key(&route.path) {
                return Err(GatewayBuildError::DuplicateRoute {
                    path: route.path.to_string(),
                });
            }

            let pipeline = Pipeline::builder()
                .route(Arc::clone(&route.path))
                .options(self.options.clone())
                .policies(build_policy_chain(&self.global, &route.policies))
                .shared_upstream(route.upstream)
                .build();
            routes.insert(route.path, pipeline);
        }

        let fallback = Pipeline::builder()
            .route(UNMATCHED_ROUTE)
            .options(self.options.clone())
            .policies(build_policy_chain(&self.global, &[]))
            .upstream(NotFound)
            .build();

        tracing::info!(
            gateway = %self.options.gateway_name,
            routes = routes.len(),
            global_policies = self.global.len(),
            "gateway built"
        );

        Ok(Gateway { routes, fallback })
    }
}

fn check_unique(scope: &str, policies: &[Policy]) -> Result<(), GatewayBuildError> {
    let mut seen = HashSet::with_capacity(policies.len());
    for policy in policies {
        if !seen.insert(policy.name()) {
            return Err(GatewayBuildError::DuplicatePolicy {
                scope: scope.to_string(),
                name: policy.name().to_string(),
            });
        }
    }
    Ok(())
}

struct NotFound;

impl Upstream for NotFound {
    fn call<'a>(&'a self, _state: &'a mut RequestState, request: Request) -> BoxFuture<'a, PolicyOutcome> {
        let outcome: PolicyOutcome =
            Err(GatewayError::not_found(format!("No route for {}", request.uri().path())).into());
        Box::pin(std::future::ready(outcome))
    }
}

/// A set of compiled routes.
pub struct Gateway {
    routes: IndexMap<Arc<str>, Pipeline>,
    fallback: Pipeline,
}

impl Gateway {
    /// Starts building a gateway.
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Returns the compiled pipeline for a declared path.
    #[must_use]
    pub fn route(&self, path: &str) -> Option<&Pipeline> {
        self.routes.get(path)
    }

    /// Iterates over routes in declaration order.
    pub fn routes(&self) -> impl Iterator<Item = &Pipeline> {
        self.routes.values()
    }

    /// Handles a request on the route whose path equals the request path.
    ///
    /// Unmatched requests run the global policies and end in a 404.
    pub async fn handle(&self, request: Request) -> Response {
        let pipeline = self.routes.get(request.uri().path()).unwrap_or(&self.fallback);
        pipeline.handle(request).await
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.routes.values().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
