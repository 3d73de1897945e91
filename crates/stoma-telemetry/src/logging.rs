//! Structured logging for Stoma.
//!
//! [`init_logging`] installs one `tracing-subscriber` fmt layer, JSON in
//! production and pretty in development, behind an [`EnvFilter`] built
//! from [`LogConfig::level`].
//!
//! Per-policy debug loggers emit under [`POLICY_DEBUG_TARGET`]. A gateway
//! running at `info` would filter them out, so [`LogConfig::policy_debug`]
//! adds a `debug` directive for that target alone.
//!
//! # Example
//!
//! ```rust,ignore
//! use stoma_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(route = "/users", policy = "auth", "policy rejected request");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// `tracing` target of per-policy debug loggers.
pub const POLICY_DEBUG_TARGET: &str = "stoma::policy";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "stoma_pipeline=debug,info").
    pub level: String,

    /// JSON lines instead of pretty output.
    pub json_format: bool,

    /// Include file and line of each event.
    pub source_location: bool,

    /// Let per-policy debug loggers through regardless of `level`.
    pub policy_debug: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Pretty, debug-level output with source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            source_location: true,
            policy_debug: true,
        }
    }

    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            source_location: false,
            policy_debug: false,
        }
    }

    /// Builds the filter this configuration logs through.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::LoggingInit` if `level` is not a valid
    /// filter directive.
    pub fn filter(&self) -> TelemetryResult<EnvFilter> {
        let filter = EnvFilter::try_new(&self.level)
            .map_err(|e| TelemetryError::LoggingInit(format!("invalid log level '{}': {e}", self.level)))?;
        if !self.policy_debug {
            return Ok(filter);
        }
        let directive = format!("{POLICY_DEBUG_TARGET}=debug")
            .parse()
            .map_err(|e| TelemetryError::LoggingInit(format!("invalid policy debug directive: {e}")))?;
        Ok(filter.add_directive(directive))
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = config.filter()?;
    let layer = tracing_subscriber::fmt::layer()
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let layer = if config.json_format {
        layer.json().boxed()
    } else {
        layer.pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
