//! Prometheus metrics for Stoma.
//!
//! Recording goes through the `metrics` facade once [`init_metrics`] has
//! installed the Prometheus recorder. Before that, every `record_*` call
//! returns after a single atomic load, without building labels.
//!
//! # Example
//!
//! ```rust,ignore
//! use stoma_telemetry::metrics::{record_policy_duration, record_request};
//!
//! record_policy_duration("auth", Duration::from_micros(350));
//! record_request("/users", 200, Duration::from_millis(12));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Policy duration histogram name.
pub const POLICY_DURATION: &str = "stoma_policy_duration_seconds";

/// Request counter name.
pub const REQUESTS_TOTAL: &str = "stoma_requests_total";

/// Request duration histogram name.
pub const REQUEST_DURATION: &str = "stoma_request_duration_seconds";

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Histogram buckets, in seconds, for both duration histograms.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // 100us .. 10s; policies are usually sub-millisecond
            duration_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are invalid or
/// another recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_histogram!(
        POLICY_DURATION,
        "Inclusive time spent in a policy, including everything it wraps"
    );
    describe_counter!(REQUESTS_TOTAL, "Total number of requests completed by the gateway");
    describe_histogram!(REQUEST_DURATION, "End-to-end request duration in seconds");
}

/// Returns true once [`init_metrics`] has installed the recorder.
#[must_use]
pub fn is_installed() -> bool {
    METRICS_HANDLE.get().is_some()
}

/// Records the inclusive duration of one policy invocation.
pub fn record_policy_duration(policy: &str, duration: Duration) {
    if !is_installed() {
        return;
    }
    histogram!(POLICY_DURATION, "policy" => policy.to_string()).record(duration.as_secs_f64());
}

/// Records a completed request.
///
/// Updates `stoma_requests_total` and `stoma_request_duration_seconds`.
pub fn record_request(route: &str, status_code: u16, duration: Duration) {
    if !is_installed() {
        return;
    }
    counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION, "route" => route.to_string()).record(duration.as_secs_f64());
}
