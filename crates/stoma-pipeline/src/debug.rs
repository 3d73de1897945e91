//! Client-requested debug response headers.
//!
//! Policies offer diagnostic values (`x-cache-status`, `x-ratelimit-bucket`,
//! ...) through [`RequestState::set_debug_header`]. Nothing reaches the
//! response unless the gateway enabled the subsystem and the client asked
//! for that name in the opt-in header:
//!
//! ```text
//! x-stoma-debug: x-cache-status, trace
//! x-stoma-debug: *
//! ```
//!
//! An operator allowlist, when configured, filters both explicit names and
//! the wildcard, so a client never sees a value outside the sanctioned set.
//!
//! [`RequestState::set_debug_header`]: crate::RequestState::set_debug_header

use indexmap::IndexMap;
use std::collections::HashSet;

/// Requesting this name activates the policy trace.
pub const TRACE_NAME: &str = "trace";

/// Requests every name (or every allowlisted name).
pub const WILDCARD: &str = "*";

/// What the client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requested {
    /// Wildcard without an allowlist.
    Everything,
    /// A concrete set of lowercase names.
    Names(HashSet<String>),
}

/// Per-request debug-header state.
///
/// Only exists when the gateway enables debug headers and the client opted
/// in with at least one usable name. Absence means "not requested".
#[derive(Debug, Clone)]
pub struct DebugHeaders {
    requested: Requested,
    collected: IndexMap<String, String>,
}

impl DebugHeaders {
    /// Parses the client opt-in header.
    ///
    /// Names are comma-separated, trimmed and lowercased. Returns `None`
    /// when nothing usable remains after allowlist filtering.
    #[must_use]
    pub fn parse(value: &str, allow: Option<&HashSet<String>>) -> Option<Self> {
        let mut wildcard = false;
        let mut names = HashSet::new();

        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == WILDCARD {
                wildcard = true;
            } else {
                names.insert(name.to_ascii_lowercase());
            }
        }

        let requested = match (wildcard, allow) {
            (true, None) => Requested::Everything,
            (true, Some(allow)) => Requested::Names(allow.clone()),
            (false, None) => Requested::Names(names),
            (false, Some(allow)) => {
                names.retain(|n| allow.contains(n));
                Requested::Names(names)
            }
        };

        if matches!(&requested, Requested::Names(names) if names.is_empty()) {
            return None;
        }

        Some(Self {
            requested,
            collected: IndexMap::new(),
        })
    }

    /// Returns the requested set.
    #[must_use]
    pub const fn requested(&self) -> &Requested {
        &self.requested
    }

    /// Returns true if a value offered under `name` would be kept.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        match &self.requested {
            Requested::Everything => true,
            Requested::Names(names) => names.contains(name),
        }
    }

    /// Returns true if the client asked for the policy trace.
    #[must_use]
    pub fn trace_requested(&self) -> bool {
        self.accepts(TRACE_NAME)
    }

    /// Stores `value` under `name` if requested. Last write wins.
    ///
    /// Returns true if the value was stored.
    pub fn offer(&mut self, name: &str, value: String) -> bool {
        if !self.accepts(name) {
            return false;
        }
        self.store(name, value);
        true
    }

    pub(crate) fn store(&mut self, name: &str, value: String) {
        self.collected.insert(name.to_string(), value);
    }

    /// Collected name/value pairs, in first-offer order.
    pub fn collected(&self) -> impl Iterator<Item = (&str, &str)> {
        self.collected.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if no values were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
    }
}
