//! The proxy front-end: intercepts every inbound request, runs it through
//! the security pipeline, forwards it upstream, and post-processes the
//! response.
//!
//! Ordering per request: access check → pipeline → forward → response scan →
//! record → broadcast → alert. Alerts are dispatched on detached tasks and
//! never delay the response to the client.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::access::EndpointDecision;
use crate::alerts::AlertEvent;
use crate::models::{ThreatLevel, TrafficEntry};
use crate::providers::detect_provider;
use crate::AppState;

/// Headers never forwarded upstream.
const STRIP_REQUEST_HEADERS: &[&str] = &["host", "content-length", "x-target-url"];
/// Hop-by-hop headers never returned to the client.
const STRIP_RESPONSE_HEADERS: &[&str] = &["content-encoding", "transfer-encoding"];

/// Catch-all handler for the proxy listener.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    // The target comes from X-Target-URL; without it the request URL itself
    // is the target (transparent mode).
    let target_url = headers
        .get("x-target-url")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| uri.to_string());

    // ── Access control ────────────────────────────────────────
    match state.access.check_endpoint(&target_url) {
        EndpointDecision::Block(reason) => {
            tracing::info!(target = %target_url, %reason, "endpoint blocked");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "blocked", "reason": reason })),
            )
                .into_response();
        }
        EndpointDecision::Allow => {
            // Allowlisted: forward directly, skipping the detectors.
            return forward_raw(&state, method, &target_url, &headers, body.to_vec()).await;
        }
        EndpointDecision::Inspect => {}
    }

    let provider = detect_provider(&target_url, None);
    tracing::debug!(provider = provider.provider.display_name(), target = %target_url, "inspecting request");

    // ── Security pipeline ─────────────────────────────────────
    let (processed_body, mut entry) = state.interceptor.process_request(&body, &target_url);
    entry.method = method.to_string();

    if entry.blocked {
        let reason = entry.block_reason.clone().unwrap_or_default();
        entry.status = 403;
        entry.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        record_and_broadcast(&state, &entry);

        fire_detached(
            &state,
            AlertEvent::RequestBlocked,
            format!("Request blocked: {reason}"),
            json!({
                "endpoint": entry.endpoint,
                "model": entry.model,
                "reason": reason,
            }),
            "high",
        );

        tracing::info!(id = %entry.id, %reason, "request blocked");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "blocked", "reason": reason })),
        )
            .into_response();
    }

    // ── Forward upstream ──────────────────────────────────────
    let upstream_headers = sanitize_request_headers(&headers);
    let result = state
        .upstream
        .send(method, &target_url, upstream_headers, processed_body)
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => return upstream_failure(&state, entry, start, e.to_string()),
    };

    let status = resp.status();
    let resp_headers = resp.headers().clone();
    let resp_body = match resp.bytes().await {
        Ok(b) => b,
        Err(e) => return upstream_failure(&state, entry, start, e.to_string()),
    };

    // ── Response processing ───────────────────────────────────
    entry.status = status.as_u16();
    let mut entry = state.interceptor.process_response(&resp_body, entry);
    entry.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    record_and_broadcast(&state, &entry);

    tracing::info!(
        id = %entry.id,
        model = %entry.model,
        tokens = entry.tokens_used,
        cost = entry.cost,
        threat = ?entry.threat_level,
        "proxied"
    );

    if entry.threat_level >= ThreatLevel::High {
        let (event, severity) = if entry.threat_level == ThreatLevel::Critical {
            (AlertEvent::ThreatCritical, "critical")
        } else {
            (AlertEvent::ThreatHigh, "high")
        };
        fire_detached(
            &state,
            event,
            format!("Threat {}: {}", entry.threat_level.as_str(), entry.model),
            json!({
                "endpoint": entry.endpoint,
                "model": entry.model,
                "tokens": entry.tokens_used,
            }),
            severity,
        );
    }

    let leaked: Vec<&str> = entry
        .pii_detected
        .iter()
        .filter(|m| m.redacted.starts_with("[RESP]"))
        .map(|m| m.pii_type.as_str())
        .collect();
    if !leaked.is_empty() {
        fire_detached(
            &state,
            AlertEvent::PiiResponseLeak,
            format!("PII leaked in response from {}", entry.model),
            json!({ "pii_types": leaked, "model": entry.model }),
            "high",
        );
    }

    build_response(status, &resp_headers, resp_body)
}

/// Direct forward for allowlisted endpoints: no detectors, no recording.
async fn forward_raw(
    state: &Arc<AppState>,
    method: Method,
    target_url: &str,
    headers: &HeaderMap,
    body: Vec<u8>,
) -> Response {
    let upstream_headers = sanitize_request_headers(headers);
    match state
        .upstream
        .send(method, target_url, upstream_headers, body)
        .await
    {
        Ok(resp) => {
            let status = resp.status();
            let resp_headers = resp.headers().clone();
            match resp.bytes().await {
                Ok(bytes) => build_response(status, &resp_headers, bytes),
                Err(e) => {
                    (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() })))
                        .into_response()
                }
            }
        }
        Err(e) => {
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// 502 path: the entry is still recorded and broadcast so the dashboard sees
/// the failure.
fn upstream_failure(
    state: &Arc<AppState>,
    mut entry: TrafficEntry,
    start: Instant,
    error: String,
) -> Response {
    entry.status = 502;
    entry.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    record_and_broadcast(state, &entry);
    tracing::warn!(id = %entry.id, %error, "upstream failure");
    (StatusCode::BAD_GATEWAY, Json(json!({ "error": error }))).into_response()
}

fn record_and_broadcast(state: &Arc<AppState>, entry: &TrafficEntry) {
    state.traffic.append(entry.clone());
    let stats = state.traffic.stats(&state.ledger);
    state.broadcaster.broadcast(&json!({
        "type": "traffic",
        "entry": entry,
        "stats": stats,
    }));
}

/// Alert dispatch never runs on the request path and never inherits its
/// cancellation.
fn fire_detached(
    state: &Arc<AppState>,
    event: AlertEvent,
    summary: String,
    details: serde_json::Value,
    severity: &'static str,
) {
    let alerts = state.alerts.clone();
    tokio::spawn(async move {
        alerts.fire(event, &summary, details, severity).await;
    });
}

fn sanitize_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if STRIP_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}

fn build_response(status: reqwest::StatusCode, headers: &HeaderMap, body: Bytes) -> Response {
    let mut builder = Response::builder().status(status.as_u16());
    if let Some(out_headers) = builder.headers_mut() {
        for (name, value) in headers {
            if STRIP_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            out_headers.insert(name.clone(), value.clone());
        }
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
