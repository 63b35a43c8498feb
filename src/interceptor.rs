//! The request/response inspection pipeline.
//!
//! Orchestrates access checks, PII detection/redaction, injection scoring,
//! and the budget gate into a single decision per request, producing the
//! `TrafficEntry` audit record along the way. Stages run strictly in order;
//! the first block verdict wins and later stages never run.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::access::{AccessStore, ModelDecision};
use crate::budget::BudgetLedger;
use crate::detectors::{injection, pii};
use crate::models::{SecurityRules, ThreatLevel, TrafficEntry};
use crate::tokens;

const PREVIEW_CHARS: usize = 150;

pub struct Interceptor {
    rules: RwLock<SecurityRules>,
    pii: Arc<pii::PiiDetector>,
    access: Arc<AccessStore>,
    ledger: Arc<BudgetLedger>,
}

impl Interceptor {
    pub fn new(
        rules: SecurityRules,
        pii: Arc<pii::PiiDetector>,
        access: Arc<AccessStore>,
        ledger: Arc<BudgetLedger>,
    ) -> Self {
        Self {
            rules: RwLock::new(rules),
            pii,
            access,
            ledger,
        }
    }

    /// Swap in a new rule set; in-flight requests keep the set they started
    /// with.
    pub fn update_rules(&self, rules: SecurityRules) {
        *self.rules.write().unwrap() = rules;
    }

    pub fn rules(&self) -> SecurityRules {
        self.rules.read().unwrap().clone()
    }

    /// Run the outbound pipeline. Returns the (possibly redacted) wire body
    /// and the audit entry; `entry.blocked` means the caller must not
    /// forward.
    pub fn process_request(&self, body: &[u8], endpoint: &str) -> (Vec<u8>, TrafficEntry) {
        let mut entry = TrafficEntry::new(endpoint);
        let rules = self.rules();

        // Non-JSON bodies pass through opaque: no detections, not blocked.
        let mut data: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => return (body.to_vec(), entry),
        };

        // The extracted prompt is captured once here; the injection stage and
        // the token estimate both see this original text, never the redacted
        // wire body.
        let prompt_text = extract_prompt(&data);
        let model = data
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        entry.model = model.clone();
        entry.prompt_preview = preview(&prompt_text);

        // ── Stage 0: access rules (model + keywords) ──────────
        if let ModelDecision::Block(reason) = self.access.check_model(&model) {
            entry.blocked = true;
            entry.block_reason = Some(reason);
            return (body.to_vec(), entry);
        }
        if let Some(reason) = self.access.check_keywords(&prompt_text) {
            entry.blocked = true;
            entry.block_reason = Some(reason);
            return (body.to_vec(), entry);
        }

        // ── Stage 1: PII detection & redaction ────────────────
        let pii_matches = self.pii.detect(&prompt_text, &rules.pii_rules);
        entry.pii_detected = pii_matches.clone();

        let mut wire_body = body.to_vec();
        if !pii_matches.is_empty() {
            if pii::should_block(&pii_matches, &rules.pii_rules) {
                let types: Vec<&str> = pii_matches.iter().map(|m| m.pii_type.as_str()).collect();
                entry.blocked = true;
                entry.block_reason = Some(format!("PII detected: {}", types.join(", ")));
                entry.threat_level = ThreatLevel::High;
                return (body.to_vec(), entry);
            }

            let redacted_text = pii::redact(&prompt_text, &pii_matches);
            replace_prompt(&mut data, &redacted_text);
            match serde_json::to_vec(&data) {
                Ok(encoded) => wire_body = encoded,
                Err(e) => tracing::warn!(error = %e, "failed to re-encode redacted body"),
            }
        }

        // ── Stage 2: injection scoring (original text) ────────
        let injection_matches = injection::detect(&prompt_text, &rules.injection_rule);
        entry.injection_detected = injection_matches.clone();

        if !injection_matches.is_empty() {
            let score = injection::compute_score(&injection_matches);
            entry.threat_level = injection::threat_level(score);

            if injection::should_block(&injection_matches, &rules.injection_rule) {
                entry.blocked = true;
                entry.block_reason = Some(format!(
                    "Injection detected (score: {:.2}): {}",
                    score, injection_matches[0].pattern
                ));
                return (wire_body, entry);
            }
        }

        // ── Stage 3: budget gate ──────────────────────────────
        let estimated_tokens = tokens::count(&prompt_text, &model);
        match self
            .ledger
            .should_block(&rules.budget_rule, &model, estimated_tokens)
        {
            Ok(Some(reason)) => {
                entry.blocked = true;
                entry.block_reason = Some(reason);
                entry.threat_level = ThreatLevel::Medium;
                return (wire_body, entry);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "budget check failed, forwarding anyway"),
        }

        entry.tokens_used = estimated_tokens;
        (wire_body, entry)
    }

    /// Run the inbound pipeline: read actual token usage, charge the ledger,
    /// and scan the response text for leaked PII.
    pub fn process_response(&self, body: &[u8], mut entry: TrafficEntry) -> TrafficEntry {
        let data: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => return entry,
        };
        let rules = self.rules();

        let tokens = data
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|t| t.as_i64())
            .unwrap_or(entry.tokens_used);
        entry.tokens_used = tokens;
        entry.cost = self.ledger.estimate(&entry.model, tokens);
        if let Err(e) = self.ledger.record(&entry.model, tokens, Some(entry.cost)) {
            tracing::warn!(error = %e, "failed to record usage");
        }

        let response_text = extract_response_text(&data);
        if !response_text.is_empty() {
            let mut resp_pii = self.pii.detect(&response_text, &rules.pii_rules);
            if !resp_pii.is_empty() {
                for m in &mut resp_pii {
                    m.redacted = format!("[RESP]{}", m.redacted);
                }
                entry.pii_detected.extend(resp_pii);
                if entry.threat_level == ThreatLevel::None {
                    entry.threat_level = ThreatLevel::Low;
                }
            }
        }

        entry
    }
}

/// First 150 code points, with a trailing ellipsis when truncated.
fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

/// Format probe: OpenAI chat messages, then `prompt`, then `input`, then the
/// raw JSON text.
fn extract_prompt(data: &Value) -> String {
    if let Some(messages) = data.get("messages").and_then(|m| m.as_array()) {
        if !messages.is_empty() {
            let user_msgs: Vec<&str> = messages
                .iter()
                .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
                .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
                .collect();
            return user_msgs.join(" ");
        }
    }
    if let Some(prompt) = data.get("prompt").and_then(|p| p.as_str()) {
        return prompt.to_string();
    }
    if let Some(input) = data.get("input").and_then(|i| i.as_str()) {
        return input.to_string();
    }
    data.to_string()
}

/// Inverse of the extraction probe: write redacted text back into whichever
/// field the prompt came from.
fn replace_prompt(data: &mut Value, new_text: &str) {
    if let Some(messages) = data.get_mut("messages").and_then(|m| m.as_array_mut()) {
        if !messages.is_empty() {
            for msg in messages.iter_mut() {
                if msg.get("role").and_then(|r| r.as_str()) == Some("user") {
                    msg["content"] = Value::String(new_text.to_string());
                }
            }
            return;
        }
    }
    if data.get("prompt").is_some() {
        data["prompt"] = Value::String(new_text.to_string());
    } else if data.get("input").is_some() {
        data["input"] = Value::String(new_text.to_string());
    }
}

/// OpenAI-style `choices[*].message.content` joined, else the Ollama
/// `response` field, else empty.
fn extract_response_text(data: &Value) -> String {
    if let Some(choices) = data.get("choices").and_then(|c| c.as_array()) {
        if !choices.is_empty() {
            let texts: Vec<&str> = choices
                .iter()
                .filter_map(|c| {
                    c.get("message")
                        .and_then(|m| m.get("content"))
                        .and_then(|t| t.as_str())
                })
                .filter(|t| !t.is_empty())
                .collect();
            return texts.join(" ");
        }
    }
    data.get("response")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_truncates_with_ellipsis() {
        let long = "x".repeat(200);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn extracts_user_messages_joined() {
        let data = json!({
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": "second"},
            ]
        });
        assert_eq!(extract_prompt(&data), "first second");
    }

    #[test]
    fn probe_falls_back_to_prompt_then_input_then_raw() {
        assert_eq!(extract_prompt(&json!({"prompt": "p"})), "p");
        assert_eq!(extract_prompt(&json!({"input": "i"})), "i");
        let raw = json!({"something": "else"});
        assert_eq!(extract_prompt(&raw), raw.to_string());
    }

    #[test]
    fn replace_writes_back_to_the_source_field() {
        let mut data = json!({"messages": [{"role": "user", "content": "secret"}]});
        replace_prompt(&mut data, "[GONE]");
        assert_eq!(data["messages"][0]["content"], "[GONE]");

        let mut data = json!({"prompt": "secret"});
        replace_prompt(&mut data, "[GONE]");
        assert_eq!(data["prompt"], "[GONE]");

        let mut data = json!({"input": "secret"});
        replace_prompt(&mut data, "[GONE]");
        assert_eq!(data["input"], "[GONE]");
    }

    #[test]
    fn response_text_joins_choices() {
        let data = json!({
            "choices": [
                {"message": {"content": "a"}},
                {"message": {"content": "b"}},
            ]
        });
        assert_eq!(extract_response_text(&data), "a b");
        assert_eq!(extract_response_text(&json!({"response": "olla"})), "olla");
        assert_eq!(extract_response_text(&json!({"other": 1})), "");
    }
}
