//! Main configuration types.
//!
//! This module provides the top-level [`GatewayConfig`] struct and its
//! conversion into [`PipelineOptions`].

use http::HeaderName;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stoma_pipeline::injector::{DEFAULT_GATEWAY_NAME, DEFAULT_REQUEST_ID_HEADER};
use stoma_pipeline::{DebugHeaderOptions, PipelineOptions};
use stoma_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};

use crate::{ConfigError, DebugHeadersConfig, ServerTimingConfig};

/// Complete gateway configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use stoma_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.name, "stoma-gateway");
/// assert_eq!(config.request_id_header, "x-request-id");
/// assert!(!config.debug_headers.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway name placed in every policy context.
    #[serde(default = "default_name")]
    pub name: String,

    /// Response header carrying the request id.
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    /// Reuse a well-formed inbound request id.
    #[serde(default)]
    pub trust_incoming_request_id: bool,

    /// Debug-header subsystem.
    #[serde(default)]
    pub debug_headers: DebugHeadersConfig,

    /// Debug-logger namespace patterns, e.g. `stoma:policy:*`.
    #[serde(default)]
    pub debug: Vec<String>,

    /// `Server-Timing` header.
    #[serde(default)]
    pub server_timing: ServerTimingConfig,

    /// Structured logging.
    #[serde(default)]
    pub logging: LogConfig,

    /// Prometheus metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_name() -> String {
    DEFAULT_GATEWAY_NAME.to_string()
}

fn default_request_id_header() -> String {
    DEFAULT_REQUEST_ID_HEADER.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            request_id_header: default_request_id_header(),
            trust_incoming_request_id: false,
            debug_headers: DebugHeadersConfig::default(),
            debug: Vec::new(),
            server_timing: ServerTimingConfig::default(),
            logging: LogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Development preset: debug headers and `Server-Timing` on, pretty
    /// debug-level logs, every policy's debug logger enabled.
    ///
    /// # Example
    ///
    /// ```
    /// use stoma_config::GatewayConfig;
    ///
    /// let config = GatewayConfig::development();
    /// assert!(config.debug_headers.enabled);
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        Self {
            debug_headers: DebugHeadersConfig {
                enabled: true,
                ..DebugHeadersConfig::default()
            },
            debug: vec![format!("{}*", stoma_pipeline::logger::POLICY_NAMESPACE_PREFIX)],
            server_timing: ServerTimingConfig { enabled: true },
            logging: LogConfig::development(),
            ..Self::default()
        }
    }

    /// Production preset: debug output off, JSON logs, metrics on.
    #[must_use]
    pub fn production() -> Self {
        Self {
            logging: LogConfig::production(),
            metrics: MetricsConfig {
                enabled: true,
                ..MetricsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The gateway name is empty
    /// - A header name is not a valid lowercase HTTP header name
    /// - An allowlist entry is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_value("name", "must not be empty"));
        }

        validate_header_name("request_id_header", &self.request_id_header)?;
        validate_header_name("debug_headers.request_header", &self.debug_headers.request_header)?;
        validate_header_name("debug_headers.trace_header", &self.debug_headers.trace_header)?;

        if let Some(allow) = &self.debug_headers.allow {
            if allow.iter().any(|name| name.trim().is_empty()) {
                return Err(ConfigError::invalid_value(
                    "debug_headers.allow",
                    "entries must not be empty",
                ));
            }
        }

        if self.debug.iter().any(|pattern| pattern.trim().is_empty()) {
            return Err(ConfigError::invalid_value("debug", "patterns must not be empty"));
        }

        Ok(())
    }

    /// Returns the telemetry section in the shape `stoma-telemetry` expects.
    ///
    /// Any `debug` pattern turns on `logging.policy_debug`, so enabled
    /// policy loggers are not filtered out by an `info` level.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        let mut logging = self.logging.clone();
        logging.policy_debug |= !self.debug.is_empty();
        TelemetryConfig {
            logging,
            metrics: self.metrics.clone(),
        }
    }
}

fn validate_header_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(ConfigError::invalid_value(field, format!("'{value}' must be lowercase")));
    }
    parse_header_name(field, value).map(|_| ())
}

fn parse_header_name(field: &str, value: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(value.as_bytes())
        .map_err(|_| ConfigError::invalid_value(field, format!("'{value}' is not a valid header name")))
}

impl TryFrom<&GatewayConfig> for PipelineOptions {
    type Error = ConfigError;

    fn try_from(config: &GatewayConfig) -> Result<Self, Self::Error> {
        let debug_headers = if config.debug_headers.enabled {
            Some(DebugHeaderOptions {
                request_header: parse_header_name(
                    "debug_headers.request_header",
                    &config.debug_headers.request_header,
                )?,
                trace_header: parse_header_name(
                    "debug_headers.trace_header",
                    &config.debug_headers.trace_header,
                )?,
                allow: config
                    .debug_headers
                    .allow
                    .as_ref()
                    .map(|allow| allow.iter().map(|n| n.trim().to_ascii_lowercase()).collect()),
            })
        } else {
            None
        };

        Ok(Self {
            gateway_name: Arc::from(config.name.as_str()),
            request_id_header: parse_header_name("request_id_header", &config.request_id_header)?,
            trust_incoming_request_id: config.trust_incoming_request_id,
            debug_headers,
            debug_patterns: config.debug.clone(),
            server_timing: config.server_timing.enabled,
            adapter: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
        assert!(GatewayConfig::development().validate().is_ok());
        assert!(GatewayConfig::production().validate().is_ok());
    }

    #[test]
    fn test_uppercase_header_rejected() {
        let config = GatewayConfig {
            request_id_header: "X-Request-Id".to_string(),
            ..GatewayConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_id_header"));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = GatewayConfig::default();
        config.debug_headers.trace_header = "x stoma trace".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_allow_entry_rejected() {
        let mut config = GatewayConfig::default();
        config.debug_headers.allow = Some(vec!["a".to_string(), " ".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_options_from_defaults() {
        let options = PipelineOptions::try_from(&GatewayConfig::default()).unwrap();
        assert_eq!(options.gateway_name.as_ref(), "stoma-gateway");
        assert_eq!(options.request_id_header, "x-request-id");
        assert!(options.debug_headers.is_none());
        assert!(!options.server_timing);
    }

    #[test]
    fn test_pipeline_options_with_debug_headers() {
        let mut config = GatewayConfig::development();
        config.debug_headers.allow = Some(vec!["X-Cache".to_string(), "trace".to_string()]);

        let options = PipelineOptions::try_from(&config).unwrap();
        let debug = options.debug_headers.unwrap();

        assert_eq!(debug.request_header, "x-stoma-debug");
        let allow = debug.allow.unwrap();
        assert!(allow.contains("x-cache"));
        assert!(allow.contains("trace"));
        assert!(options.server_timing);
        assert_eq!(options.debug_patterns, vec!["stoma:policy:*"]);
    }

    #[test]
    fn test_debug_patterns_enable_policy_debug_logging() {
        let mut config = GatewayConfig::production();
        assert!(!config.telemetry().logging.policy_debug);

        config.debug = vec!["stoma:policy:auth".to_string()];
        let telemetry = config.telemetry();
        assert!(telemetry.logging.policy_debug);
        assert_eq!(telemetry.logging.level, "info");
    }

    #[test]
    fn test_pipeline_options_rejects_bad_header() {
        let config = GatewayConfig {
            request_id_header: "bad header".to_string(),
            ..GatewayConfig::default()
        };
        assert!(PipelineOptions::try_from(&config).is_err());
    }
}
