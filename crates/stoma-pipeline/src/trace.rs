//! Per-request policy traces.
//!
//! When a client requests `trace` through the debug opt-in header, every
//! policy that runs gets a baseline entry (name, priority, duration, whether
//! it advanced, error) whether or not it cooperates. A policy can add its
//! own `{action, data}` detail through a [`TraceReporter`]:
//!
//! ```rust,ignore
//! let reporter = state.policy_trace("cache");
//! reporter.report("hit", Some(json!({ "key": key })));
//! ```
//!
//! The assembled [`PolicyTrace`] is serialized once into a single response
//! header at finalization.

use crate::recorder::Recorder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The assembled trace for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTrace {
    /// The request ID.
    pub request_id: String,
    /// The distributed trace ID.
    pub trace_id: String,
    /// The matched route.
    pub route: String,
    /// Total elapsed time for the request.
    pub total_ms: f64,
    /// One entry per executed policy, in execution order.
    pub entries: Vec<PolicyTraceEntry>,
}

/// One executed policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTraceEntry {
    /// Policy name.
    pub name: String,
    /// Declared priority.
    pub priority: i32,
    /// Inclusive duration.
    pub duration_ms: f64,
    /// Whether the policy advanced to the next step.
    pub called_next: bool,
    /// The error the policy ended with, or null.
    pub error: Option<String>,
    /// Detail reported by the policy itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<TraceDetail>,
}

impl PolicyTraceEntry {
    pub(crate) fn started(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            duration_ms: 0.0,
            called_next: false,
            error: None,
            detail: None,
        }
    }
}

/// Cooperative detail reported by a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDetail {
    /// What the policy did (e.g. `hit`, `miss`, `allowed`).
    pub action: String,
    /// Optional structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Reports cooperative trace detail for one policy.
///
/// Always callable. When tracing is inactive this is [`TraceReporter::NOOP`],
/// which holds nothing and does nothing.
#[derive(Clone, Default)]
pub struct TraceReporter {
    target: Option<(Recorder, Arc<str>)>,
}

impl TraceReporter {
    /// The shared inactive reporter.
    pub const NOOP: Self = Self { target: None };

    pub(crate) fn new(recorder: Recorder, policy: Arc<str>) -> Self {
        Self {
            target: Some((recorder, policy)),
        }
    }

    /// Returns true if reports are being collected.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.target.is_some()
    }

    /// Stores `{action, data}` as this policy's detail. Last call wins.
    pub fn report(&self, action: impl Into<String>, data: Option<serde_json::Value>) {
        if let Some((recorder, policy)) = &self.target {
            recorder.report(
                policy,
                TraceDetail {
                    action: action.into(),
                    data,
                },
            );
        }
    }
}

impl std::fmt::Debug for TraceReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some((_, policy)) => f.debug_tuple("TraceReporter").field(policy).finish(),
            None => f.write_str("TraceReporter::NOOP"),
        }
    }
}
