//! Configuration schema types.
//!
//! This module defines the nested configuration sections of
//! [`GatewayConfig`](crate::GatewayConfig).

use serde::{Deserialize, Serialize};

/// Debug-header subsystem configuration.
///
/// # Example
///
/// ```
/// use stoma_config::DebugHeadersConfig;
///
/// let config = DebugHeadersConfig {
///     enabled: true,
///     allow: Some(vec!["x-cache-status".to_string(), "trace".to_string()]),
///     ..Default::default()
/// };
/// assert_eq!(config.request_header, "x-stoma-debug");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DebugHeadersConfig {
    /// Master switch. Off means opt-in headers are ignored.
    #[serde(default)]
    pub enabled: bool,

    /// Header the client uses to request debug output.
    #[serde(default = "default_request_header")]
    pub request_header: String,

    /// Operator allowlist of requestable names. `None` allows every name.
    #[serde(default)]
    pub allow: Option<Vec<String>>,

    /// Header the serialized policy trace is written to.
    #[serde(default = "default_trace_header")]
    pub trace_header: String,
}

impl Default for DebugHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            request_header: default_request_header(),
            allow: None,
            trace_header: default_trace_header(),
        }
    }
}

fn default_request_header() -> String {
    stoma_pipeline::injector::DEFAULT_DEBUG_REQUEST_HEADER.to_string()
}

fn default_trace_header() -> String {
    stoma_pipeline::injector::DEFAULT_TRACE_HEADER.to_string()
}

/// `Server-Timing` header configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerTimingConfig {
    /// Emit per-policy self-times and the total.
    #[serde(default)]
    pub enabled: bool,
}
