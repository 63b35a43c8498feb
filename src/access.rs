//! Endpoint / model / keyword access rules, evaluated before any detector.
//!
//! Allowlisted endpoints bypass the security pipeline entirely; blocklisted
//! endpoints are rejected immediately; everything else is inspected. Rules
//! persist to a JSON file with atomic replace.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// The five rule lists. Endpoint matching is case-sensitive substring;
/// model and keyword matching are case-insensitive substring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessRules {
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,
    #[serde(default)]
    pub blocked_endpoints: Vec<String>,
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub blocked_models: Vec<String>,
}

/// Partial update: only these keys are recognized; unknown keys in the
/// request body are dropped.
#[derive(Debug, Default, Deserialize)]
pub struct AccessUpdate {
    pub allowed_endpoints: Option<Vec<String>>,
    pub blocked_endpoints: Option<Vec<String>>,
    pub blocked_keywords: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
    pub blocked_models: Option<Vec<String>>,
}

/// Three-way verdict for an endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointDecision {
    /// Bypass the security pipeline and forward directly.
    Allow,
    /// Reject immediately with the given reason.
    Block(String),
    /// Proceed through the normal pipeline.
    Inspect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelDecision {
    Allow,
    Block(String),
}

pub struct AccessStore {
    path: PathBuf,
    rules: Mutex<AccessRules>,
}

impl AccessStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rules = load_or_default(&path);
        Self {
            path,
            rules: Mutex::new(rules),
        }
    }

    /// Allowlist is checked first, so allow wins when both lists match.
    pub fn check_endpoint(&self, endpoint: &str) -> EndpointDecision {
        let rules = self.rules.lock().unwrap();
        for pattern in &rules.allowed_endpoints {
            if endpoint.contains(pattern.as_str()) {
                return EndpointDecision::Allow;
            }
        }
        for pattern in &rules.blocked_endpoints {
            if endpoint.contains(pattern.as_str()) {
                return EndpointDecision::Block(format!(
                    "Endpoint matches blocklist pattern: {}",
                    pattern
                ));
            }
        }
        EndpointDecision::Inspect
    }

    /// Blocklist first; then, when an allowlist exists, the model must match
    /// one of its entries.
    pub fn check_model(&self, model: &str) -> ModelDecision {
        let rules = self.rules.lock().unwrap();
        let model_lower = model.to_lowercase();

        for blocked in &rules.blocked_models {
            if model_lower.contains(&blocked.to_lowercase()) {
                return ModelDecision::Block(format!("Model '{}' is blocklisted", model));
            }
        }
        if !rules.allowed_models.is_empty()
            && !rules
                .allowed_models
                .iter()
                .any(|allowed| model_lower.contains(&allowed.to_lowercase()))
        {
            return ModelDecision::Block(format!("Model '{}' is not in the allowlist", model));
        }
        ModelDecision::Allow
    }

    /// Returns the reason for the first matching blocked keyword.
    pub fn check_keywords(&self, text: &str) -> Option<String> {
        let text_lower = text.to_lowercase();
        let rules = self.rules.lock().unwrap();
        rules
            .blocked_keywords
            .iter()
            .find(|kw| text_lower.contains(&kw.to_lowercase()))
            .map(|kw| format!("Blocked keyword detected: '{}'", kw))
    }

    pub fn get(&self) -> AccessRules {
        self.rules.lock().unwrap().clone()
    }

    /// Apply a partial update and persist. Absent keys leave their lists
    /// untouched.
    pub fn update(&self, update: AccessUpdate) -> anyhow::Result<AccessRules> {
        let mut rules = self.rules.lock().unwrap();
        if let Some(v) = update.allowed_endpoints {
            rules.allowed_endpoints = v;
        }
        if let Some(v) = update.blocked_endpoints {
            rules.blocked_endpoints = v;
        }
        if let Some(v) = update.blocked_keywords {
            rules.blocked_keywords = v;
        }
        if let Some(v) = update.allowed_models {
            rules.allowed_models = v;
        }
        if let Some(v) = update.blocked_models {
            rules.blocked_models = v;
        }
        persist(&self.path, &rules)?;
        Ok(rules.clone())
    }
}

fn load_or_default(path: &Path) -> AccessRules {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| {
            tracing::warn!(path = %path.display(), "malformed access rules file, using defaults");
            AccessRules::default()
        }),
        Err(_) => AccessRules::default(),
    }
}

fn persist(path: &Path, rules: &AccessRules) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(rules)?)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
