//! Policy store: holds the active `SecurityRules` and persists them as JSON.
//!
//! The file is the single source of truth across restarts; a malformed or
//! missing file falls back to defaults and the proxy keeps running.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

use crate::models::SecurityRules;

pub struct PolicyStore {
    path: PathBuf,
    rules: Mutex<SecurityRules>,
}

impl PolicyStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rules = load_or_default(&path);
        Self {
            path,
            rules: Mutex::new(rules),
        }
    }

    pub fn get(&self) -> SecurityRules {
        self.rules.lock().unwrap().clone()
    }

    /// Validate, persist, and swap in a new rule set. The in-memory copy is
    /// only replaced once the file write succeeds.
    pub fn update(&self, new_rules: SecurityRules) -> anyhow::Result<SecurityRules> {
        new_rules
            .validate()
            .map_err(|detail| anyhow::anyhow!(detail))?;

        let mut rules = self.rules.lock().unwrap();
        persist(&self.path, &new_rules)?;
        *rules = new_rules.clone();
        Ok(new_rules)
    }
}

fn load_or_default(path: &Path) -> SecurityRules {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<SecurityRules>(&raw) {
            Ok(rules) if rules.validate().is_ok() => rules,
            Ok(_) | Err(_) => {
                tracing::warn!(path = %path.display(), "malformed policy file, using defaults");
                SecurityRules::default()
            }
        },
        Err(_) => SecurityRules::default(),
    }
}

/// Atomic replace: write a temp file in the same directory, then rename.
fn persist(path: &Path, rules: &SecurityRules) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(rules)?;
    std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleAction;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::open(dir.path().join("policy.json"));
        assert_eq!(store.get().pii_rules.len(), 5);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = PolicyStore::open(&path);
        assert_eq!(store.get().injection_rule.threshold, 0.6);
    }

    #[test]
    fn update_persists_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.json");

        let store = PolicyStore::open(&path);
        let mut rules = store.get();
        rules.injection_rule.threshold = 0.9;
        rules.budget_rule.action = RuleAction::Warn;
        store.update(rules).unwrap();

        let reopened = PolicyStore::open(&path);
        assert_eq!(reopened.get().injection_rule.threshold, 0.9);
        assert_eq!(reopened.get().budget_rule.action, RuleAction::Warn);
    }

    #[test]
    fn invalid_rules_are_rejected_and_not_applied() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::open(dir.path().join("policy.json"));
        let mut rules = store.get();
        rules.injection_rule.threshold = 7.0;
        assert!(store.update(rules).is_err());
        assert_eq!(store.get().injection_rule.threshold, 0.6);
    }
}
