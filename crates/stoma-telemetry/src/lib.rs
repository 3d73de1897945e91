//! Observability for the Stoma gateway.
//!
//! - **Logging**: structured logs through `tracing-subscriber`, JSON in
//!   production and pretty output in development
//! - **Metrics**: Prometheus-format metrics via the `metrics` facade
//!
//! Recording functions return immediately until [`init_metrics`] installs
//! a recorder.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `stoma_policy_duration_seconds` | Histogram | `policy` | Inclusive time spent in a policy |
//! | `stoma_requests_total` | Counter | `route`, `status` | Completed requests |
//! | `stoma_request_duration_seconds` | Histogram | `route` | End-to-end request latency |
//!
//! # Example
//!
//! ```rust,ignore
//! use stoma_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config)?;
//!
//! tracing::info!(route = "/users", "gateway ready");
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}
