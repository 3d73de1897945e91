//! # Stoma Core
//!
//! Core types shared by every Stoma execution surface.
//!
//! This crate provides the foundational vocabulary used throughout Stoma:
//!
//! - [`PolicyInput`], [`PolicyResult`], [`Mutation`] - The protocol-agnostic
//!   evaluation contract used by non-HTTP runtimes
//! - [`Phase`] and [`Protocol`] - Where in the message lifecycle an input was taken
//! - [`GatewayError`] and [`PipelineError`] - Structured and unrecognized errors
//! - [`RequestId`] - UUID v7 request identifier
//! - [`TraceParent`] - W3C `traceparent` parsing and formatting
//!
//! Nothing in this crate depends on an async runtime; it is pure data.

#![doc(html_root_url = "https://docs.rs/stoma-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod protocol;
mod request_id;
pub mod trace_context;

pub use error::{
    ErrorEnvelope, GatewayError, PipelineError, PipelineResult, INTERNAL_ERROR_CODE,
    INTERNAL_ERROR_MESSAGE,
};
pub use protocol::{
    apply_header_mutation, client_ip, Attributes, BodyMutation, HeaderMutation, ImmediateResponse, Mutation, Phase,
    PolicyInput, PolicyResult, Protocol,
};
pub use request_id::RequestId;
pub use trace_context::{TraceFlags, TraceParent};
