//! Loading gateway configuration from files on disk.

use std::io::Write;

use bytes::Bytes;
use http::{Request as HttpRequest, StatusCode};
use http_body_util::Full;
use stoma_config::{ConfigError, ConfigLoader, GatewayConfig};
use stoma_pipeline::{
    policy_fn, upstream_fn, Pipeline, PipelineOptions, Policy, PolicyOutcome, Response, ResponseExt,
};
use tempfile::NamedTempFile;

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const TOML: &str = r#"
name = "edge-eu"
trust_incoming_request_id = true
debug = ["stoma:policy:cache"]

[debug_headers]
enabled = true
allow = ["x-cache-status", "trace"]

[server_timing]
enabled = true

[logging]
level = "warn"
"#;

#[test]
fn test_load_toml_file() {
    let file = write_temp(".toml", TOML);
    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

    assert_eq!(config.name, "edge-eu");
    assert!(config.trust_incoming_request_id);
    assert_eq!(config.debug, vec!["stoma:policy:cache"]);
    assert!(config.debug_headers.enabled);
    assert_eq!(config.debug_headers.request_header, "x-stoma-debug");
    assert!(config.server_timing.enabled);
    assert_eq!(config.logging.level, "warn");
    assert!(!config.metrics.enabled);
}

#[test]
fn test_load_json_file() {
    let file = write_temp(
        ".json",
        r#"{"name": "edge-us", "debug_headers": {"enabled": true, "trace_header": "x-trace"}}"#,
    );
    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

    assert_eq!(config.name, "edge-us");
    assert_eq!(config.debug_headers.trace_header, "x-trace");
    assert!(config.debug_headers.allow.is_none());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.toml");

    let result = ConfigLoader::new().with_file(&path);
    assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));

    let config = ConfigLoader::new()
        .with_optional_file(&path)
        .unwrap()
        .load()
        .unwrap();
    assert_eq!(config, GatewayConfig::default());
}

#[test]
fn test_unsupported_extension() {
    let file = write_temp(".yaml", "name: edge");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
}

#[test]
fn test_unknown_field_in_file_rejected() {
    let file = write_temp(".toml", "[debug_headers]\nenabled = true\nallowlist = [\"a\"]\n");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_loaded_config_drives_a_pipeline() {
    let file = write_temp(".toml", TOML);
    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
    let options = PipelineOptions::try_from(&config).unwrap();

    let pipeline = Pipeline::builder()
        .route("/assets")
        .options(options)
        .policy(Policy::new(
            "cache",
            40,
            policy_fn(|state, request, next| {
                Box::pin(async move {
                    state.set_debug_header("x-cache-status", "HIT");
                    state.set_debug_header("x-cache-key", "/assets");
                    next.run(state, request).await
                })
            }),
        ))
        .upstream(upstream_fn(|_request| async {
            let outcome: PolicyOutcome = Ok(Response::text(StatusCode::OK, "asset"));
            outcome
        }))
        .build();

    let request = HttpRequest::builder()
        .uri("/assets")
        .header("x-request-id", "0191f3a2-7c4e-7b10-9a52-3c1d2e4f5a6b")
        .header("x-stoma-debug", "*")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = tokio_test::block_on(pipeline.handle(request));

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "0191f3a2-7c4e-7b10-9a52-3c1d2e4f5a6b");
    assert_eq!(response.headers()["x-cache-status"], "HIT");
    assert!(!response.headers().contains_key("x-cache-key"));
    assert!(response.headers().contains_key("x-stoma-trace"));

    let timing = response.headers()["server-timing"].to_str().unwrap();
    assert!(timing.starts_with("cache;dur="));
    assert!(timing.contains("total;dur="));
}
