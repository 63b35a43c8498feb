//! Prompt Firewall — local security proxy for outbound LLM API traffic.
//!
//! Inspects every request between client applications and upstream
//! providers: endpoint/model access control, PII detection and redaction,
//! prompt-injection scoring, and budget accounting, with real-time fan-out
//! to dashboard stream consumers and alert webhooks.

use std::sync::Arc;

pub mod access;
pub mod alerts;
pub mod api;
pub mod broadcast;
pub mod budget;
pub mod config;
pub mod detectors;
pub mod errors;
pub mod interceptor;
pub mod models;
pub mod policy;
pub mod providers;
pub mod proxy;
pub mod tokens;
pub mod traffic;

/// Shared application state. The root owns every subsystem; subsystems never
/// reference back.
pub struct AppState {
    pub config: config::Config,
    pub policy: policy::PolicyStore,
    pub access: Arc<access::AccessStore>,
    pub pii: Arc<detectors::pii::PiiDetector>,
    pub ledger: Arc<budget::BudgetLedger>,
    pub interceptor: interceptor::Interceptor,
    pub alerts: Arc<alerts::AlertDispatcher>,
    pub broadcaster: broadcast::Broadcaster,
    pub traffic: traffic::TrafficLog,
    pub upstream: proxy::upstream::UpstreamClient,
}

impl AppState {
    /// Wire up every subsystem against the configured data directory.
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        let data = &config.data_dir;
        let policy = policy::PolicyStore::open(data.join("policy.json"));
        let access = Arc::new(access::AccessStore::open(data.join("access_rules.json")));
        let pii = Arc::new(detectors::pii::PiiDetector::new());
        let ledger = Arc::new(budget::BudgetLedger::open(&data.join("budget.db"))?);
        let interceptor = interceptor::Interceptor::new(
            policy.get(),
            pii.clone(),
            access.clone(),
            ledger.clone(),
        );

        Ok(Self {
            config,
            policy,
            access,
            pii,
            ledger,
            interceptor,
            alerts: Arc::new(alerts::AlertDispatcher::new()),
            broadcaster: broadcast::Broadcaster::new(),
            traffic: traffic::TrafficLog::new(),
            upstream: proxy::upstream::UpstreamClient::new(),
        })
    }
}
