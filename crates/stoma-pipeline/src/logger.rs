//! Per-policy debug loggers.
//!
//! Each policy can ask for a logger namespaced `stoma:policy:<name>`. The
//! factory enables a namespace when it matches one of the configured
//! patterns (exact, or a prefix ending in `*`); every other policy gets
//! [`DebugLogger::NOOP`].
//!
//! Events go to the `stoma::policy` tracing target, which
//! `LogConfig::policy_debug` lets through the subscriber's filter.

use std::sync::Arc;
use stoma_telemetry::logging::POLICY_DEBUG_TARGET;

/// Namespace prefix for policy loggers.
pub const POLICY_NAMESPACE_PREFIX: &str = "stoma:policy:";

/// A namespaced debug logger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugLogger {
    namespace: Option<Arc<str>>,
}

impl DebugLogger {
    /// The shared disabled logger.
    pub const NOOP: Self = Self { namespace: None };

    /// Returns true if this logger emits anything.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.namespace.is_some()
    }

    /// Returns the namespace, if enabled.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Emits a debug event.
    pub fn log(&self, message: &str) {
        if let Some(namespace) = &self.namespace {
            tracing::debug!(target: POLICY_DEBUG_TARGET, namespace = %namespace, "{message}");
        }
    }

    /// Emits a debug event with structured data.
    pub fn log_with(&self, message: &str, data: &serde_json::Value) {
        if let Some(namespace) = &self.namespace {
            tracing::debug!(target: POLICY_DEBUG_TARGET, namespace = %namespace, data = %data, "{message}");
        }
    }
}

/// Hands out debug loggers according to namespace patterns.
#[derive(Debug, Clone, Default)]
pub struct DebugLoggerFactory {
    patterns: Arc<[String]>,
}

impl DebugLoggerFactory {
    /// Creates a factory from patterns such as `stoma:policy:*` or
    /// `stoma:policy:auth`.
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if any namespace can be enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns the logger for a policy.
    #[must_use]
    pub fn logger(&self, policy: &str) -> DebugLogger {
        if self.patterns.is_empty() {
            return DebugLogger::NOOP;
        }
        let namespace = format!("{POLICY_NAMESPACE_PREFIX}{policy}");
        if self.patterns.iter().any(|p| matches(p, &namespace)) {
            DebugLogger {
                namespace: Some(namespace.into()),
            }
        } else {
            DebugLogger::NOOP
        }
    }
}

fn matches(pattern: &str, namespace: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => namespace.starts_with(prefix),
        None => pattern == namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_patterns_gives_noop() {
        let factory = DebugLoggerFactory::default();
        assert_eq!(factory.logger("auth"), DebugLogger::NOOP);
        assert!(!factory.logger("auth").is_enabled());
    }

    #[test]
    fn test_wildcard_pattern() {
        let factory = DebugLoggerFactory::new(["stoma:policy:*"]);
        let logger = factory.logger("auth");
        assert_eq!(logger.namespace(), Some("stoma:policy:auth"));
    }

    #[test]
    fn test_exact_and_prefix_patterns() {
        let factory = DebugLoggerFactory::new(["stoma:policy:auth", "stoma:policy:rate*"]);
        assert!(factory.logger("auth").is_enabled());
        assert!(factory.logger("rate-limit").is_enabled());
        assert!(!factory.logger("authz").is_enabled());
        assert!(!factory.logger("cache").is_enabled());
    }

    #[test]
    fn test_noop_logging_is_inert() {
        DebugLogger::NOOP.log("ignored");
        DebugLogger::NOOP.log_with("ignored", &serde_json::json!({"a": 1}));
    }
}
