//! Debug-header gating tests.
//!
//! One policy offers three debug values (`a`, `b`, `c`) on every request.
//! Which of them reach the response depends on the gateway switch, the
//! client opt-in header, and the operator allowlist.

use bytes::Bytes;
use http::{Request as HttpRequest, StatusCode};
use http_body_util::Full;
use stoma_pipeline::{
    policy_fn, upstream_fn, Pipeline, PipelineOptions, Policy, PolicyOutcome, Request, Response, ResponseExt,
};

const DEBUG_RESPONSE_HEADERS: [&str; 4] = ["a", "b", "c", "x-stoma-trace"];

fn pipeline(options: PipelineOptions) -> Pipeline {
    Pipeline::builder()
        .route("/debug")
        .options(options)
        .policy(Policy::new(
            "offer",
            0,
            policy_fn(|state, request, next| {
                Box::pin(async move {
                    state.set_debug_header("a", 1);
                    state.set_debug_header("b", "two");
                    state.set_debug_header("c", false);
                    next.run(state, request).await
                })
            }),
        ))
        .upstream(upstream_fn(|_request| async {
            let outcome: PolicyOutcome = Ok(Response::empty(StatusCode::NO_CONTENT));
            outcome
        }))
        .build()
}

fn request(debug: Option<&str>) -> Request {
    let mut builder = HttpRequest::builder().uri("/debug");
    if let Some(value) = debug {
        builder = builder.header("x-stoma-debug", value);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

/// Debug response headers present on `response`, in a fixed order.
fn present(response: &Response) -> Vec<&'static str> {
    DEBUG_RESPONSE_HEADERS
        .into_iter()
        .filter(|name| response.headers().contains_key(*name))
        .collect()
}

#[tokio::test]
async fn test_no_opt_in_means_no_debug_headers() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_headers());
    let response = pipeline.handle(request(None)).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(present(&response).is_empty());
}

#[tokio::test]
async fn test_opt_in_ignored_when_subsystem_disabled() {
    let pipeline = pipeline(PipelineOptions::default());
    let response = pipeline.handle(request(Some("*"))).await;
    assert!(present(&response).is_empty());
}

#[tokio::test]
async fn test_explicit_names_are_honoured_exactly() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_headers());
    let response = pipeline.handle(request(Some("a, b"))).await;

    assert_eq!(present(&response), vec!["a", "b"]);
    assert_eq!(response.headers()["a"], "1");
    assert_eq!(response.headers()["b"], "two");
}

#[tokio::test]
async fn test_names_are_case_insensitive() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_headers());
    let response = pipeline.handle(request(Some(" C ,"))).await;

    assert_eq!(present(&response), vec!["c"]);
    assert_eq!(response.headers()["c"], "false");
}

#[tokio::test]
async fn test_whitespace_opt_in_is_not_a_request() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_headers());
    let response = pipeline.handle(request(Some("  ,  "))).await;
    assert!(present(&response).is_empty());
}

#[tokio::test]
async fn test_wildcard_without_allowlist_includes_trace() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_headers());
    let response = pipeline.handle(request(Some("*"))).await;

    assert_eq!(present(&response), vec!["a", "b", "c", "x-stoma-trace"]);
}

#[tokio::test]
async fn test_wildcard_expands_to_allowlist_only() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_allowlist(["a"]));
    let response = pipeline.handle(request(Some("*"))).await;

    assert_eq!(present(&response), vec!["a"]);
}

#[tokio::test]
async fn test_allowlist_filters_explicit_names_and_trace() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_allowlist(["b"]));
    let response = pipeline.handle(request(Some("a, b, trace"))).await;

    assert_eq!(present(&response), vec!["b"]);
}

#[tokio::test]
async fn test_trace_alone_activates_tracing() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_headers());
    let response = pipeline.handle(request(Some("trace"))).await;

    assert_eq!(present(&response), vec!["x-stoma-trace"]);
    let trace: serde_json::Value =
        serde_json::from_str(response.headers()["x-stoma-trace"].to_str().unwrap()).unwrap();
    assert_eq!(trace["entries"][0]["name"], "offer");
    assert_eq!(trace["entries"][0]["calledNext"], serde_json::json!(true));
}

#[tokio::test]
async fn test_allowlisted_trace_via_wildcard() {
    let pipeline = pipeline(PipelineOptions::default().with_debug_allowlist(["trace", "c"]));
    let response = pipeline.handle(request(Some("*"))).await;

    assert_eq!(present(&response), vec!["c", "x-stoma-trace"]);
}

#[tokio::test]
async fn test_debug_values_cannot_replace_gateway_headers() {
    let pipeline = Pipeline::builder()
        .route("/debug")
        .options(PipelineOptions::default().with_debug_headers())
        .policy(Policy::new(
            "spoof",
            0,
            policy_fn(|state, request, next| {
                Box::pin(async move {
                    state.set_debug_header("x-request-id", "spoofed");
                    state.set_debug_header("traceparent", "spoofed");
                    state.set_debug_header("x-stoma-trace", "spoofed");
                    state.set_debug_header("a", 1);
                    next.run(state, request).await
                })
            }),
        ))
        .upstream(upstream_fn(|_request| async {
            let outcome: PolicyOutcome = Ok(Response::empty(StatusCode::NO_CONTENT));
            outcome
        }))
        .build();

    let response = pipeline
        .handle(request(Some("x-request-id, traceparent, x-stoma-trace, a")))
        .await;

    assert_eq!(present(&response), vec!["a"]);
    assert_ne!(response.headers()["x-request-id"], "spoofed");
    assert_ne!(response.headers()["traceparent"], "spoofed");
    assert!(response.headers()["traceparent"].to_str().unwrap().starts_with("00-"));
}
