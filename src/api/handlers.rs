//! Admin REST handlers: rules, access lists, webhooks, traffic, replay, and
//! the detector test endpoints.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::access::AccessUpdate;
use crate::alerts::AlertEvent;
use crate::detectors::injection;
use crate::errors::AppError;
use crate::models::{SecurityRules, TrafficEntry};
use crate::AppState;

// ── Stats & budget ───────────────────────────────────────────

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.traffic.stats(&state.ledger)))
}

pub async fn get_budget(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let stats = state.ledger.stats().map_err(AppError::Internal)?;
    Ok(Json(json!(stats)))
}

// ── Security rules ───────────────────────────────────────────

pub async fn get_rules(State(state): State<Arc<AppState>>) -> Json<SecurityRules> {
    Json(state.policy.get())
}

pub async fn update_rules(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<SecurityRules>, AppError> {
    let rules: SecurityRules = serde_json::from_value(body)
        .map_err(|e| AppError::ValidationFailed(e.to_string()))?;
    let updated = state
        .policy
        .update(rules)
        .map_err(|e| AppError::ValidationFailed(e.to_string()))?;
    state.interceptor.update_rules(updated.clone());
    Ok(Json(updated))
}

// ── Access rules ─────────────────────────────────────────────

pub async fn get_access(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.access.get()))
}

pub async fn update_access(
    State(state): State<Arc<AppState>>,
    Json(update): Json<AccessUpdate>,
) -> Result<Json<Value>, AppError> {
    let rules = state.access.update(update).map_err(AppError::Internal)?;
    Ok(Json(json!(rules)))
}

// ── Webhooks ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddWebhookBody {
    pub url: Option<String>,
    pub name: Option<String>,
    pub events: Option<Vec<AlertEvent>>,
    pub secret: Option<String>,
}

pub async fn list_webhooks(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.alerts.list()))
}

pub async fn add_webhook(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddWebhookBody>,
) -> Result<Json<Value>, AppError> {
    let url = body.url.filter(|u| !u.is_empty()).ok_or(AppError::MissingField("url"))?;
    let webhook = state
        .alerts
        .add(&url, body.name.as_deref(), body.events, body.secret);
    Ok(Json(json!({
        "ok": true,
        "webhook": { "name": webhook.name, "url": webhook.url },
    })))
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: Option<String>,
}

pub async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NameQuery>,
) -> Json<Value> {
    let name = query.name.as_deref().unwrap_or("default");
    Json(json!({ "ok": state.alerts.remove(name) }))
}

// ── Alerts & traffic ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    Json(json!(state.alerts.history(query.limit.unwrap_or(50))))
}

pub async fn get_traffic(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<TrafficEntry>> {
    Json(state.traffic.last(query.limit.unwrap_or(100)))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub async fn export_traffic(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let entries = state.traffic.snapshot();
    let format = query.format.as_deref().unwrap_or("json").to_lowercase();

    if format == "csv" {
        let body = entries_to_csv(&entries).map_err(AppError::Internal)?;
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=traffic_export.csv",
                ),
            ],
            body,
        )
            .into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=traffic_export.json",
            ),
        ],
        serde_json::to_string_pretty(&entries).map_err(|e| AppError::Internal(e.into()))?,
    )
        .into_response())
}

/// Flatten entries into CSV; list-valued fields are embedded as JSON text.
fn entries_to_csv(entries: &[TrafficEntry]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "id",
        "timestamp",
        "method",
        "endpoint",
        "model",
        "prompt_preview",
        "status",
        "tokens_used",
        "cost",
        "threat_level",
        "pii_detected",
        "injection_detected",
        "blocked",
        "block_reason",
        "latency_ms",
    ])?;
    for e in entries {
        writer.write_record([
            e.id.clone(),
            e.timestamp.to_rfc3339(),
            e.method.clone(),
            e.endpoint.clone(),
            e.model.clone(),
            e.prompt_preview.clone(),
            e.status.to_string(),
            e.tokens_used.to_string(),
            e.cost.to_string(),
            e.threat_level.as_str().to_string(),
            serde_json::to_string(&e.pii_detected)?,
            serde_json::to_string(&e.injection_detected)?,
            e.blocked.to_string(),
            e.block_reason.clone().unwrap_or_default(),
            e.latency_ms.to_string(),
        ])?;
    }
    let raw = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing csv writer: {e}"))?;
    Ok(String::from_utf8(raw)?)
}

// ── Custom PII patterns ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddPatternBody {
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub label: Option<String>,
}

pub async fn list_patterns(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.pii.list_custom()))
}

pub async fn add_pattern(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddPatternBody>,
) -> Result<Json<Value>, AppError> {
    let name = body.name.filter(|n| !n.is_empty()).ok_or(AppError::MissingField("name"))?;
    let pattern = body
        .pattern
        .filter(|p| !p.is_empty())
        .ok_or(AppError::MissingField("pattern"))?;

    if !state.pii.add_custom(&name, &pattern, body.label.as_deref()) {
        return Err(AppError::ValidationFailed(format!(
            "invalid regex pattern: {pattern}"
        )));
    }
    Ok(Json(json!({ "ok": true, "name": name })))
}

pub async fn delete_pattern(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Value>, AppError> {
    let name = query.name.ok_or(AppError::MissingField("name"))?;
    Ok(Json(json!({ "ok": state.pii.remove_custom(&name) })))
}

// ── Replay (dry-run) ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReplayBody {
    pub id: Option<String>,
    pub text: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

/// Re-run a request through the pipeline without forwarding upstream. Either
/// replays a logged entry by id (rebuilding a chat body from its preview) or
/// takes raw text.
pub async fn replay(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReplayBody>,
) -> Result<Json<Value>, AppError> {
    let (text, endpoint, model) = match body.id {
        Some(id) => {
            let entry = state
                .traffic
                .find(&id)
                .ok_or_else(|| AppError::NotFound(format!("Entry {id} not found")))?;
            (entry.prompt_preview, entry.endpoint, entry.model)
        }
        None => (
            body.text.unwrap_or_default(),
            body.endpoint.unwrap_or_else(|| "test://replay".into()),
            body.model.unwrap_or_else(|| "unknown".into()),
        ),
    };
    if text.is_empty() {
        return Err(AppError::MissingField("text"));
    }

    let synthetic = json!({
        "model": model,
        "messages": [{ "role": "user", "content": text }],
    });
    let (_, entry) = state
        .interceptor
        .process_request(synthetic.to_string().as_bytes(), &endpoint);

    Ok(Json(json!({
        "replay": true,
        "blocked": entry.blocked,
        "block_reason": entry.block_reason,
        "threat_level": entry.threat_level,
        "pii_detected": entry.pii_detected,
        "injection_detected": entry.injection_detected,
        "tokens_estimated": entry.tokens_used,
        "model": entry.model,
    })))
}

// ── Detector test endpoints ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TestBody {
    pub text: Option<String>,
}

pub async fn test_pii(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TestBody>,
) -> Result<Json<Value>, AppError> {
    let text = body.text.filter(|t| !t.is_empty()).ok_or(AppError::MissingField("text"))?;
    let matches = state.pii.detect(&text, &state.policy.get().pii_rules);
    Ok(Json(json!(matches)))
}

pub async fn test_injection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TestBody>,
) -> Result<Json<Value>, AppError> {
    let text = body.text.filter(|t| !t.is_empty()).ok_or(AppError::MissingField("text"))?;
    let rule = state.policy.get().injection_rule;
    let matches = injection::detect(&text, &rule);
    let score = injection::compute_score(&matches);
    Ok(Json(json!({
        "matches": matches,
        "score": score,
        "level": injection::threat_level(score),
    })))
}
