//! Typed configuration system for the Stoma gateway.
//!
//! This crate provides a strongly-typed configuration system for Stoma
//! pipelines with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! The configuration system is built around [`GatewayConfig`], which holds
//! the pipeline-level options plus the telemetry sections:
//!
//! - [`DebugHeadersConfig`] - client opt-in debug headers and the policy trace
//! - [`ServerTimingConfig`] - per-policy `Server-Timing` output
//! - `logging` / `metrics` - forwarded to `stoma-telemetry`
//!
//! A loaded config converts into [`PipelineOptions`](stoma_pipeline::PipelineOptions)
//! with `TryFrom`.
//!
//! # Example
//!
//! ```no_run
//! use stoma_config::ConfigLoader;
//! use stoma_pipeline::{Gateway, PipelineOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("gateway.toml")?
//!     .with_env_prefix("STOMA")
//!     .load()?;
//!
//! let options = PipelineOptions::try_from(&config)?;
//! let gateway = Gateway::builder().options(options).build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! name = "edge-eu"
//! request_id_header = "x-request-id"
//! trust_incoming_request_id = false
//! debug = ["stoma:policy:auth"]
//!
//! [debug_headers]
//! enabled = true
//! request_header = "x-stoma-debug"
//! trace_header = "x-stoma-trace"
//! allow = ["x-cache-status", "trace"]
//!
//! [server_timing]
//! enabled = true
//!
//! [logging]
//! level = "info"
//! json_format = true
//!
//! [metrics]
//! enabled = true
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden via environment variables using the format
//! `PREFIX__SECTION__KEY` (or `PREFIX__KEY` at the top level). For example:
//!
//! - `STOMA__NAME=edge-eu`
//! - `STOMA__DEBUG_HEADERS__ENABLED=true`
//! - `STOMA__SERVER_TIMING__ENABLED=false`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
