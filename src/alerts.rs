//! Alerting: fans security events out to registered webhooks.
//!
//! Each webhook carries an event filter and an optional HMAC signing secret.
//! Deliveries run concurrently with a 10-second per-request ceiling; a
//! failure is logged at warn and never reaches the request path. A bounded
//! in-memory history keeps the last 100 alerts for the dashboard.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::warn;

const HISTORY_CAP: usize = 100;

// ── Events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    ThreatHigh,
    ThreatCritical,
    RequestBlocked,
    BudgetWarning,
    PiiResponseLeak,
}

impl AlertEvent {
    pub fn all() -> Vec<AlertEvent> {
        vec![
            AlertEvent::ThreatHigh,
            AlertEvent::ThreatCritical,
            AlertEvent::RequestBlocked,
            AlertEvent::BudgetWarning,
            AlertEvent::PiiResponseLeak,
        ]
    }
}

// ── Configuration & payloads ─────────────────────────────────

/// A registered webhook. `name` is the primary key: re-adding a name
/// replaces the old registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    pub events: Vec<AlertEvent>,
    pub enabled: bool,
    /// HMAC signing key; never serialized back out to the admin surface.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
}

/// Compact history record kept for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub event: AlertEvent,
    pub timestamp: String,
    pub summary: String,
    pub severity: String,
}

// ── Dispatcher ───────────────────────────────────────────────

pub struct AlertDispatcher {
    webhooks: Mutex<Vec<WebhookConfig>>,
    history: Mutex<VecDeque<AlertRecord>>,
    client: reqwest::Client,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self {
            webhooks: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("prompt-firewall/0.1")
                .build()
                .expect("failed to build webhook HTTP client"),
        }
    }

    /// Register (or replace) a webhook. Defaults: name "default", all events.
    pub fn add(
        &self,
        url: &str,
        name: Option<&str>,
        events: Option<Vec<AlertEvent>>,
        secret: Option<String>,
    ) -> WebhookConfig {
        let config = WebhookConfig {
            name: name.unwrap_or("default").to_string(),
            url: url.to_string(),
            events: events.unwrap_or_else(AlertEvent::all),
            enabled: true,
            secret,
        };
        let mut webhooks = self.webhooks.lock().unwrap();
        webhooks.retain(|w| w.name != config.name);
        webhooks.push(config.clone());
        tracing::info!(name = %config.name, url = %config.url, "webhook registered");
        config
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut webhooks = self.webhooks.lock().unwrap();
        let before = webhooks.len();
        webhooks.retain(|w| w.name != name);
        webhooks.len() < before
    }

    pub fn list(&self) -> Vec<WebhookConfig> {
        self.webhooks.lock().unwrap().clone()
    }

    pub fn history(&self, limit: usize) -> Vec<AlertRecord> {
        let history = self.history.lock().unwrap();
        history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Record the alert and POST it to every enabled webhook subscribed to
    /// `event`. Deliveries are concurrent and independent; errors never
    /// propagate to the caller.
    pub async fn fire(&self, event: AlertEvent, summary: &str, details: Value, severity: &str) {
        let timestamp = Utc::now().to_rfc3339();

        {
            let mut history = self.history.lock().unwrap();
            history.push_back(AlertRecord {
                event,
                timestamp: timestamp.clone(),
                summary: summary.to_string(),
                severity: severity.to_string(),
            });
            while history.len() > HISTORY_CAP {
                history.pop_front();
            }
        }

        let targets: Vec<(String, String, Option<String>)> = {
            let webhooks = self.webhooks.lock().unwrap();
            webhooks
                .iter()
                .filter(|w| w.enabled && w.events.contains(&event))
                .map(|w| (w.name.clone(), w.url.clone(), w.secret.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        // Serialized once; every webhook gets the identical body.
        let body = json!({
            "event": event,
            "timestamp": timestamp,
            "summary": summary,
            "details": details,
            "severity": severity,
            "source": "prompt-firewall",
        })
        .to_string();

        let sends = targets.into_iter().map(|(name, url, secret)| {
            let client = self.client.clone();
            let body = body.clone();
            async move {
                let mut req = client
                    .post(&url)
                    .header("content-type", "application/json");
                if let Some(secret) = &secret {
                    req = req.header("X-PF-Signature", hmac_sha256_hex(secret, body.as_bytes()));
                }
                match req.body(body).send().await {
                    Ok(resp) if resp.status().is_client_error() || resp.status().is_server_error() => {
                        warn!(webhook = %name, status = %resp.status(), "webhook returned error status");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(webhook = %name, error = %e, "webhook delivery failed"),
                }
            }
        });
        futures::future::join_all(sends).await;
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase hex HMAC-SHA256 digest for the X-PF-Signature header.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
