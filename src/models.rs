//! Core data model: rule configuration, detector match records, and the
//! per-request `TrafficEntry` audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Enumerations ─────────────────────────────────────────────

/// Ordered severity scale. The derived `Ord` follows declaration order,
/// so `None < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

/// What to do when a rule matches. Only `Block` and `Redact` have enforced
/// behavior; `Warn` and `Log` attach metadata without altering the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Redact,
    Warn,
    Log,
}

/// The PII categories the built-in patterns recognize. `Custom` tags matches
/// produced by the user-defined pattern registry; no rule ever targets it,
/// so custom matches redact but never block on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PIIType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    Custom,
}

impl PIIType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PIIType::Email => "email",
            PIIType::Phone => "phone",
            PIIType::Ssn => "ssn",
            PIIType::CreditCard => "credit_card",
            PIIType::IpAddress => "ip_address",
            PIIType::Custom => "custom",
        }
    }
}

// ── Rule configuration ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PIIRule {
    pub pii_type: PIIType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_redact")]
    pub action: RuleAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionRule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_block")]
    pub action: RuleAction,
}

impl Default for InjectionRule {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            action: RuleAction::Block,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: f64,
    #[serde(default = "default_weekly_limit")]
    pub weekly_limit: f64,
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: f64,
    #[serde(default = "default_block")]
    pub action: RuleAction,
}

impl Default for BudgetRule {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: default_daily_limit(),
            weekly_limit: default_weekly_limit(),
            monthly_limit: default_monthly_limit(),
            action: RuleAction::Block,
        }
    }
}

/// The full security rule set the interceptor runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRules {
    #[serde(default = "default_pii_rules")]
    pub pii_rules: Vec<PIIRule>,
    #[serde(default)]
    pub injection_rule: InjectionRule,
    #[serde(default)]
    pub budget_rule: BudgetRule,
}

impl Default for SecurityRules {
    fn default() -> Self {
        Self {
            pii_rules: default_pii_rules(),
            injection_rule: InjectionRule::default(),
            budget_rule: BudgetRule::default(),
        }
    }
}

impl SecurityRules {
    /// Range-check thresholds and limits. Returns the first violation.
    pub fn validate(&self) -> Result<(), String> {
        let t = self.injection_rule.threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(format!("injection threshold {} outside [0, 1]", t));
        }
        for (name, limit) in [
            ("daily_limit", self.budget_rule.daily_limit),
            ("weekly_limit", self.budget_rule.weekly_limit),
            ("monthly_limit", self.budget_rule.monthly_limit),
        ] {
            if limit < 0.0 || !limit.is_finite() {
                return Err(format!("budget {} must be non-negative, got {}", name, limit));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_redact() -> RuleAction {
    RuleAction::Redact
}
fn default_block() -> RuleAction {
    RuleAction::Block
}
fn default_threshold() -> f64 {
    0.6
}
fn default_daily_limit() -> f64 {
    1.0
}
fn default_weekly_limit() -> f64 {
    10.0
}
fn default_monthly_limit() -> f64 {
    50.0
}

fn default_pii_rules() -> Vec<PIIRule> {
    let rule = |pii_type, action| PIIRule {
        pii_type,
        enabled: true,
        action,
    };
    vec![
        rule(PIIType::Email, RuleAction::Redact),
        rule(PIIType::Phone, RuleAction::Redact),
        rule(PIIType::Ssn, RuleAction::Block),
        rule(PIIType::CreditCard, RuleAction::Redact),
        rule(PIIType::IpAddress, RuleAction::Redact),
    ]
}

// ── Detector match records ───────────────────────────────────

/// One PII hit. `position` is a half-open span over the UTF-8 code points of
/// the scanned text: `0 <= start < end <= chars(text)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PIIMatch {
    pub pii_type: PIIType,
    pub value: String,
    pub redacted: String,
    pub position: (usize, usize),
}

/// One injection pattern hit. `pattern` is the human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionMatch {
    pub pattern: String,
    pub score: f64,
    pub severity: ThreatLevel,
}

// ── Traffic entry ────────────────────────────────────────────

/// The canonical per-request audit record. Created at request entry, mutated
/// through the interceptor's request and response phases, then frozen when
/// appended to the traffic log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub endpoint: String,
    pub model: String,
    pub prompt_preview: String,
    pub status: u16,
    pub tokens_used: i64,
    pub cost: f64,
    pub threat_level: ThreatLevel,
    pub pii_detected: Vec<PIIMatch>,
    pub injection_detected: Vec<InjectionMatch>,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub latency_ms: f64,
}

impl TrafficEntry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            id: entry_id(),
            timestamp: Utc::now(),
            method: "POST".into(),
            endpoint: endpoint.into(),
            model: "unknown".into(),
            prompt_preview: String::new(),
            status: 200,
            tokens_used: 0,
            cost: 0.0,
            threat_level: ThreatLevel::None,
            pii_detected: Vec::new(),
            injection_detected: Vec::new(),
            blocked: false,
            block_reason: None,
            latency_ms: 0.0,
        }
    }
}

/// 8-char opaque entry id, unique enough for a 10k-entry ring.
fn entry_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

// ── Dashboard stats ──────────────────────────────────────────

/// Live snapshot served to the dashboard and attached to stream frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_requests: usize,
    pub blocked_requests: usize,
    pub pii_detections: usize,
    pub injection_attempts: usize,
    pub total_spend_today: f64,
    pub total_tokens_today: i64,
    pub requests_per_minute: usize,
}
