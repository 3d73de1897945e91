//! # Stoma
//!
//! **Policy pipeline core for an edge API gateway**
//!
//! Stoma runs an ordered chain of named policies around an upstream call:
//!
//! - **Deterministic ordering** – global and route policies merged by name and
//!   sorted by priority
//! - **Per-policy timing** – inclusive and self times, surfaced as a JSON trace
//!   and a `Server-Timing` header
//! - **Opt-in debug headers** – clients ask for named values, operators
//!   allowlist them
//! - **Uniform error envelope** – every error or panic becomes the same JSON
//!   body with request-id and traceparent headers attached
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stoma::prelude::*;
//!
//! let config = ConfigLoader::new()
//!     .with_optional_file("gateway.toml")?
//!     .with_env_prefix("STOMA")
//!     .load()?;
//! init_telemetry(&config.telemetry())?;
//!
//! let gateway = Gateway::builder()
//!     .options(PipelineOptions::try_from(&config)?)
//!     .global_policy(auth_policy())
//!     .route(RouteDefinition::new("/orders", orders_upstream()))
//!     .build()?;
//!
//! let response = gateway.handle(request).await;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → prepare → policy 0 → policy 1 → ... → upstream
//!                                                    ↓
//! Response ← finalize ← error boundary ←─────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/stoma/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use stoma_core as core;

// Re-export the pipeline
pub use stoma_pipeline as pipeline;

// Re-export telemetry
pub use stoma_telemetry as telemetry;

// Re-export configuration
pub use stoma_config as config;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use stoma::prelude::*;
/// ```
pub mod prelude {
    pub use stoma_core::{
        GatewayError, ImmediateResponse, Mutation, Phase, PipelineError, PolicyInput, PolicyResult, Protocol,
        RequestId, TraceParent,
    };

    // Building and running pipelines
    pub use stoma_pipeline::{
        policy_fn, priority, upstream_fn, EvalContext, Gateway, GatewayBuilder, Next, Pipeline, PipelineOptions,
        Policy, PolicyEvaluator, PolicyHandler, PolicyOutcome, Request, RequestState, Response, ResponseExt,
        RouteDefinition, Upstream,
    };

    // Configuration
    pub use stoma_config::{ConfigError, ConfigLoader, GatewayConfig};

    // Telemetry
    pub use stoma_telemetry::{init_telemetry, TelemetryConfig};
}
