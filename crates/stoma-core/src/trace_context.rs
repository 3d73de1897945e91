//! W3C Trace Context propagation.
//!
//! Supports the [W3C Trace Context](https://www.w3.org/TR/trace-context/)
//! `traceparent` header:
//!
//! ```text
//! {version}-{trace-id}-{parent-id}-{flags}
//! 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01
//! ```
//!
//! The gateway continues an inbound trace when the header is well-formed and
//! otherwise starts a new one. Every hop gets a fresh span ID.

use std::fmt;
use uuid::Uuid;

/// The W3C Trace Context header for trace propagation.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// The only version this gateway emits.
const EMITTED_VERSION: &str = "00";

/// Trace flags from the W3C Trace Context spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// No flags set.
    pub const NONE: Self = Self(0x00);
    /// The trace is sampled.
    pub const SAMPLED: Self = Self(0x01);

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns true if the sampled flag is set.
    #[must_use]
    pub const fn is_sampled(self) -> bool {
        self.0 & 0x01 != 0
    }
}

impl Default for TraceFlags {
    fn default() -> Self {
        Self::SAMPLED
    }
}

impl fmt::Display for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// A parsed `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    /// The 128-bit trace ID as 32 lowercase hex chars.
    pub trace_id: String,
    /// The 64-bit parent span ID as 16 lowercase hex chars.
    pub parent_id: String,
    /// Trace flags (sampling, etc.).
    pub flags: TraceFlags,
}

impl TraceParent {
    /// Parses a `traceparent` header value.
    ///
    /// Returns `None` for anything malformed: wrong field count or widths,
    /// non-hex characters, the forbidden version `ff`, or an all-zero
    /// trace or parent ID.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let parent_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        if !is_hex(version, 2) || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        if !is_hex(trace_id, 32) || is_all_zero(trace_id) {
            return None;
        }
        if !is_hex(parent_id, 16) || is_all_zero(parent_id) {
            return None;
        }
        if !is_hex(flags, 2) {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            parent_id: parent_id.to_ascii_lowercase(),
            flags: TraceFlags(flags),
        })
    }

    /// Formats the outbound header for this hop.
    ///
    /// The trace ID is propagated and `span_id` becomes the parent ID seen
    /// by the next hop.
    #[must_use]
    pub fn format(trace_id: &str, span_id: &str, flags: TraceFlags) -> String {
        format!("{EMITTED_VERSION}-{trace_id}-{span_id}-{flags}")
    }
}

/// Generates a new random trace ID (32 hex chars).
#[must_use]
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generates a new random span ID (16 hex chars, never all zero).
#[must_use]
pub fn generate_span_id() -> String {
    let (high, low) = Uuid::new_v4().as_u64_pair();
    let id = (high ^ low).max(1);
    format!("{id:016x}")
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_all_zero(value: &str) -> bool {
    value.bytes().all(|b| b == b'0')
}
