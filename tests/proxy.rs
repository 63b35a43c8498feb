//! Proxy front-end tests against wiremock upstream and webhook doubles.
//!
//! These verify the wire-level behavior: redacted bodies reaching the
//! upstream, block verdicts never reaching it, hop-by-hop header stripping,
//! and alert webhook delivery with HMAC signatures.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prompt_firewall::access::AccessUpdate;
use prompt_firewall::alerts::{hmac_sha256_hex, AlertEvent};
use prompt_firewall::config::Config;
use prompt_firewall::proxy::handler::proxy_handler;
use prompt_firewall::AppState;

fn state() -> (TempDir, Arc<AppState>) {
    let dir = TempDir::new().unwrap();
    let cfg = Config {
        proxy_port: 0,
        admin_port: 0,
        data_dir: dir.path().to_path_buf(),
        api_key: "test-key".into(),
        api_key_generated: false,
        cors_origins: vec!["*".into()],
    };
    (dir, Arc::new(AppState::new(cfg).unwrap()))
}

fn headers_for(target: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-target-url", target.parse().unwrap());
    headers.insert("content-type", "application/json".parse().unwrap());
    headers.insert("authorization", "Bearer sk-test".parse().unwrap());
    headers
}

fn chat_body(content: &str) -> Bytes {
    Bytes::from(
        json!({
            "model": "gpt-4o",
            "messages": [{ "role": "user", "content": content }],
        })
        .to_string(),
    )
}

async fn call(
    state: &Arc<AppState>,
    target: &str,
    body: Bytes,
) -> axum::response::Response {
    proxy_handler(
        State(state.clone()),
        Method::POST,
        Uri::from_static("/v1/chat/completions"),
        headers_for(target),
        body,
    )
    .await
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn openai_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": "the answer is 4" } }],
        "usage": { "total_tokens": 42 },
    }))
}

#[tokio::test]
async fn clean_request_is_forwarded_and_recorded() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(openai_response())
        .expect(1)
        .mount(&upstream)
        .await;

    let (_dir, state) = state();
    let target = format!("{}/v1/chat/completions", upstream.uri());
    let resp = call(&state, &target, chat_body("What is 2+2?")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["choices"][0]["message"]["content"], "the answer is 4");

    assert_eq!(state.traffic.len(), 1);
    let snapshot = state.traffic.snapshot();
    let entry = &snapshot[0];
    assert!(!entry.blocked);
    assert_eq!(entry.status, 200);
    assert_eq!(entry.tokens_used, 42);
    assert!(entry.latency_ms >= 0.0);
}

#[tokio::test]
async fn redacted_body_reaches_upstream_without_the_email() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(openai_response())
        .mount(&upstream)
        .await;

    let (_dir, state) = state();
    let target = format!("{}/v1/chat/completions", upstream.uri());
    call(&state, &target, chat_body("My email is leak@test.com")).await;

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let forwarded = String::from_utf8(received[0].body.clone()).unwrap();
    assert!(forwarded.contains("[EMAIL_REDACTED]"));
    assert!(!forwarded.contains("leak@test.com"));
}

#[tokio::test]
async fn hop_by_hop_headers_are_stripped_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(openai_response())
        .mount(&upstream)
        .await;

    let (_dir, state) = state();
    let target = format!("{}/v1/chat/completions", upstream.uri());
    call(&state, &target, chat_body("hi")).await;

    let received = &upstream.received_requests().await.unwrap()[0];
    assert!(received.headers.get("x-target-url").is_none());
    assert_eq!(
        received.headers.get("authorization").unwrap(),
        "Bearer sk-test"
    );
}

#[tokio::test]
async fn blocked_request_never_reaches_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(openai_response())
        .expect(0)
        .mount(&upstream)
        .await;

    let (_dir, state) = state();
    let target = format!("{}/v1/chat/completions", upstream.uri());
    let resp = call(&state, &target, chat_body("SSN: 123-45-6789")).await;

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "blocked");
    assert!(body["reason"].as_str().unwrap().contains("PII"));

    let snapshot = state.traffic.snapshot();
    let entry = &snapshot[0];
    assert!(entry.blocked);
    assert_eq!(entry.status, 403);
}

#[tokio::test]
async fn blocklisted_endpoint_is_rejected_outright() {
    let (_dir, state) = state();
    state
        .access
        .update(AccessUpdate {
            blocked_endpoints: Some(vec!["evil.example".into()]),
            ..Default::default()
        })
        .unwrap();

    let resp = call(&state, "https://evil.example/api", chat_body("hi")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    // Endpoint blocks happen before the pipeline; nothing is recorded.
    assert!(state.traffic.is_empty());
}

#[tokio::test]
async fn allowlisted_endpoint_bypasses_detectors() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&upstream)
        .await;

    let (_dir, state) = state();
    state
        .access
        .update(AccessUpdate {
            allowed_endpoints: Some(vec!["/v1/models".into()]),
            ..Default::default()
        })
        .unwrap();

    let target = format!("{}/v1/models", upstream.uri());
    let resp = call(&state, &target, chat_body("SSN: 123-45-6789")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Forwarded verbatim: no redaction, no traffic entry.
    let received = &upstream.received_requests().await.unwrap()[0];
    assert!(String::from_utf8(received.body.clone())
        .unwrap()
        .contains("123-45-6789"));
    assert!(state.traffic.is_empty());
}

#[tokio::test]
async fn upstream_failure_returns_502_and_records_entry() {
    let (_dir, state) = state();
    // Nothing listens on port 9; connection is refused after retries.
    let resp = call(&state, "http://127.0.0.1:9/v1/chat/completions", chat_body("hi")).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(state.traffic.len(), 1);
    assert_eq!(state.traffic.snapshot()[0].status, 502);
}

#[tokio::test]
async fn stream_consumers_get_a_traffic_frame() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(openai_response())
        .mount(&upstream)
        .await;

    let (_dir, state) = state();
    let mut rx = state.broadcaster.subscribe();

    let target = format!("{}/v1/chat/completions", upstream.uri());
    call(&state, &target, chat_body("hi")).await;

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "traffic");
    assert_eq!(frame["entry"]["model"], "gpt-4o");
    assert!(frame["stats"]["total_requests"].as_u64().unwrap() >= 1);
}

// ── Alert webhooks ───────────────────────────────────────────

async fn wait_for_requests(server: &MockServer, n: usize) -> Vec<wiremock::Request> {
    for _ in 0..40 {
        let received = server.received_requests().await.unwrap();
        if received.len() >= n {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    server.received_requests().await.unwrap()
}

#[tokio::test]
async fn webhook_receives_signed_payload() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hook)
        .await;

    let (_dir, state) = state();
    state.alerts.add(
        &hook.uri(),
        Some("ops"),
        None,
        Some("hunter2".into()),
    );
    state
        .alerts
        .fire(
            AlertEvent::RequestBlocked,
            "Request blocked: test",
            json!({ "endpoint": "e" }),
            "high",
        )
        .await;

    let received = wait_for_requests(&hook, 1).await;
    assert_eq!(received.len(), 1);

    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["event"], "request_blocked");
    assert_eq!(body["source"], "prompt-firewall");
    assert_eq!(body["severity"], "high");

    let signature = received[0]
        .headers
        .get("x-pf-signature")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(signature, hmac_sha256_hex("hunter2", &received[0].body));
}

#[tokio::test]
async fn webhook_event_filter_is_respected() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hook)
        .await;

    let (_dir, state) = state();
    state.alerts.add(
        &hook.uri(),
        Some("leaks-only"),
        Some(vec![AlertEvent::PiiResponseLeak]),
        None,
    );

    state
        .alerts
        .fire(AlertEvent::RequestBlocked, "nope", json!({}), "high")
        .await;
    state
        .alerts
        .fire(AlertEvent::PiiResponseLeak, "leak", json!({}), "high")
        .await;

    let received = wait_for_requests(&hook, 1).await;
    assert_eq!(received.len(), 1);
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["event"], "pii_response_leak");
}

#[tokio::test]
async fn response_pii_leak_fires_exactly_one_alert() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "Your SSN is 123-45-6789" } }],
            "usage": { "total_tokens": 50 },
        })))
        .mount(&upstream)
        .await;

    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hook)
        .await;

    let (_dir, state) = state();
    state.alerts.add(
        &hook.uri(),
        Some("leaks"),
        Some(vec![AlertEvent::PiiResponseLeak]),
        None,
    );

    let target = format!("{}/v1/chat/completions", upstream.uri());
    let resp = call(&state, &target, chat_body("what is my ssn?")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let received = wait_for_requests(&hook, 1).await;
    assert_eq!(received.len(), 1);
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["event"], "pii_response_leak");
    assert_eq!(body["details"]["pii_types"][0], "ssn");

    // The alert is also in the bounded history.
    let history = state.alerts.history(10);
    assert!(history
        .iter()
        .any(|r| matches!(r.event, AlertEvent::PiiResponseLeak)));
}

#[tokio::test]
async fn webhook_failure_never_surfaces() {
    let (_dir, state) = state();
    // Unreachable webhook: fire must complete without error and still record
    // history.
    state
        .alerts
        .add("http://127.0.0.1:9/hook", Some("dead"), None, None);
    state
        .alerts
        .fire(AlertEvent::ThreatHigh, "t", json!({}), "high")
        .await;
    assert_eq!(state.alerts.history(10).len(), 1);
}
