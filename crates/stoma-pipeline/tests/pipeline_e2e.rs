//! End-to-end pipeline integration tests.
//!
//! A gateway with three global policies in priority order:
//!
//! 1. `log` (0) - always continues
//! 2. `auth` (10) - rejects requests without an `authorization` header
//! 3. `ratelimit` (20) - continues and reports its decision
//!
//! These tests verify ordering, short-circuiting, the error boundary,
//! identity headers on every response, and the shape of the policy trace.

use bytes::Bytes;
use http::{Request as HttpRequest, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stoma_core::{ErrorEnvelope, GatewayError, TraceParent, INTERNAL_ERROR_MESSAGE};
use stoma_pipeline::{
    policy_fn, priority, upstream_fn, Gateway, GatewayBuilder, PipelineOptions, Policy, PolicyOutcome, Request,
    Response, ResponseExt, RouteDefinition,
};

const INBOUND_TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

fn log_policy() -> Policy {
    Policy::new(
        "log",
        priority::OBSERVABILITY,
        policy_fn(|state, request, next| {
            Box::pin(async move {
                let logger = state.debug_logger("log");
                logger.log("request received");
                next.run(state, request).await
            })
        }),
    )
}

fn auth_policy() -> Policy {
    Policy::new(
        "auth",
        priority::AUTH,
        policy_fn(|state, request, next| {
            Box::pin(async move {
                if request.headers().contains_key("authorization") {
                    state.policy_trace("auth").report("allow", Some(json!({ "scheme": "bearer" })));
                    next.run(state, request).await
                } else {
                    state.policy_trace("auth").report("deny", None);
                    let outcome: PolicyOutcome = Err(GatewayError::unauthorized("Missing credentials")
                        .with_header("www-authenticate", "Bearer")
                        .into());
                    outcome
                }
            })
        }),
    )
}

fn ratelimit_policy(calls: Arc<AtomicUsize>) -> Policy {
    Policy::new(
        "ratelimit",
        priority::RATE_LIMIT,
        policy_fn(move |state, request, next| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                state.set_debug_header("x-stoma-ratelimit-remaining", 99);
                next.run(state, request).await
            })
        }),
    )
}

fn gateway(options: PipelineOptions, calls: Arc<AtomicUsize>) -> Gateway {
    GatewayBuilder::new()
        .options(options)
        .global_policy(ratelimit_policy(calls))
        .global_policy(auth_policy())
        .global_policy(log_policy())
        .route(RouteDefinition::new(
            "/orders",
            upstream_fn(|_request| async {
                let outcome: PolicyOutcome = Ok(Response::json(StatusCode::OK, r#"{"orders":[]}"#));
                outcome
            }),
        ))
        .route(
            RouteDefinition::new(
                "/broken",
                upstream_fn(|_request| async {
                    let outcome: PolicyOutcome = Ok(Response::empty(StatusCode::OK));
                    outcome
                }),
            )
            .with_policy(Policy::new(
                "explode",
                priority::TRANSFORM,
                policy_fn(|_state, _request, _next| {
                    Box::pin(async {
                        let payload: Option<PolicyOutcome> = None;
                        payload.expect("explode always panics")
                    })
                }),
            )),
        )
        .route(
            RouteDefinition::new(
                "/db",
                upstream_fn(|_request| async {
                    let outcome: PolicyOutcome = Ok(Response::empty(StatusCode::OK));
                    outcome
                }),
            )
            .with_policy(Policy::new(
                "lookup",
                priority::CACHE,
                policy_fn(|_state, _request, _next| {
                    Box::pin(async {
                        let port: Result<u16, anyhow::Error> = "not-a-port".parse().map_err(anyhow::Error::from);
                        let outcome: PolicyOutcome = port
                            .map(|port| Response::text(StatusCode::OK, port.to_string()))
                            .map_err(Into::into);
                        outcome
                    })
                }),
            )),
        )
        .build()
        .unwrap()
}

fn request(path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = HttpRequest::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn trace(response: &Response) -> Value {
    serde_json::from_str(header(response, "x-stoma-trace").expect("trace header")).unwrap()
}

async fn envelope(response: Response) -> ErrorEnvelope {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_policies_run_in_priority_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = gateway(PipelineOptions::default().with_debug_headers(), Arc::clone(&calls));

    assert_eq!(
        gateway.route("/orders").unwrap().policy_names(),
        vec!["log", "auth", "ratelimit"]
    );

    let response = gateway
        .handle(request(
            "/orders",
            &[("authorization", "Bearer t"), ("x-stoma-debug", "trace")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let trace = trace(&response);
    let names: Vec<_> = trace["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["log", "auth", "ratelimit"]);
    assert!(trace["entries"]
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["calledNext"] == json!(true) && e["error"].is_null()));
    assert_eq!(trace["entries"][1]["detail"]["action"], "allow");
    assert_eq!(trace["route"], "/orders");
}

#[tokio::test]
async fn test_auth_failure_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let gateway = gateway(PipelineOptions::default().with_debug_headers(), Arc::clone(&calls));

    let response = gateway
        .handle(request("/orders", &[("x-stoma-debug", "trace")]))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(header(&response, "www-authenticate"), Some("Bearer"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let trace = trace(&response);
    let entries = trace["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "log");
    assert_eq!(entries[0]["calledNext"], json!(true));
    assert_eq!(entries[1]["name"], "auth");
    assert_eq!(entries[1]["priority"], json!(10));
    assert_eq!(entries[1]["calledNext"], json!(false));
    assert!(entries[1]["error"].as_str().unwrap().contains("unauthorized"));
    assert_eq!(entries[1]["detail"]["action"], "deny");
}

#[tokio::test]
async fn test_identity_headers_on_error_responses() {
    let gateway = gateway(PipelineOptions::default(), Arc::new(AtomicUsize::new(0)));

    let response = gateway
        .handle(request("/orders", &[("traceparent", INBOUND_TRACEPARENT)]))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let traceparent = TraceParent::parse(header(&response, "traceparent").unwrap()).unwrap();
    assert_eq!(traceparent.trace_id, "0af7651916cd43dd8448eb211c80319c");
    assert_ne!(traceparent.parent_id, "b7ad6b7169203331");
    assert!(traceparent.flags.is_sampled());

    let request_id = header(&response, "x-request-id").unwrap().to_string();
    let envelope = envelope(response).await;
    assert_eq!(envelope.error, "unauthorized");
    assert_eq!(envelope.status_code, 401);
    assert_eq!(envelope.request_id, Some(request_id));
}

#[tokio::test]
async fn test_panicking_policy_becomes_500() {
    let gateway = gateway(PipelineOptions::default().with_debug_headers(), Arc::new(AtomicUsize::new(0)));

    let response = gateway
        .handle(request(
            "/broken",
            &[("authorization", "Bearer t"), ("x-stoma-debug", "trace")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(header(&response, "x-request-id").is_some());
    assert!(header(&response, "traceparent").is_some());

    let trace = trace(&response);
    let entries = trace["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e["error"] == json!("panicked")));

    let envelope = envelope(response).await;
    assert_eq!(envelope.error, "internal_error");
    assert_eq!(envelope.message, INTERNAL_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_propagated_error_is_generic_500() {
    let gateway = gateway(PipelineOptions::default(), Arc::new(AtomicUsize::new(0)));

    let response = gateway
        .handle(request("/db", &[("authorization", "Bearer t")]))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = envelope(response).await;
    assert_eq!(envelope.message, INTERNAL_ERROR_MESSAGE);
    assert!(!envelope.message.contains("invalid digit"));
}

#[tokio::test]
async fn test_server_timing_lists_policies_outermost_first() {
    let gateway = gateway(PipelineOptions::default().with_server_timing(), Arc::new(AtomicUsize::new(0)));

    let response = gateway
        .handle(request("/orders", &[("authorization", "Bearer t")]))
        .await;

    let value = header(&response, "server-timing").unwrap();
    let names: Vec<_> = value
        .split(", ")
        .map(|metric| metric.split(';').next().unwrap())
        .collect();
    assert_eq!(names, vec!["log", "auth", "ratelimit", "total"]);
}

#[tokio::test]
async fn test_unmatched_path_runs_globals_then_404() {
    let gateway = gateway(PipelineOptions::default(), Arc::new(AtomicUsize::new(0)));

    let response = gateway
        .handle(request("/nowhere", &[("authorization", "Bearer t")]))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(header(&response, "x-request-id").is_some());
}
