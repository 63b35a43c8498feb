//! PII detection and redaction.
//!
//! Scans prompt and response text against a fixed table of built-in patterns
//! plus a detector-owned registry of user-defined regexes. Matches carry
//! code-point spans so redaction stays index-safe on non-ASCII text.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{PIIMatch, PIIRule, PIIType, RuleAction};

// ── Built-in patterns ────────────────────────────────────────

struct BuiltinPattern {
    pii_type: PIIType,
    regex: &'static Lazy<Regex>,
    label: &'static str,
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

// The separator between the 3-3-4 groups is mandatory, so a stray 7- or
// 10-digit run never matches.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-.\s])?(?:\(\d{3}\)|\d{3})[-.\s]\d{3}[-.\s]?\d{4}\b").unwrap()
});

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static CREDIT_CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").unwrap());

static IP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

/// Scan order is fixed: matches are returned built-in-first, in this order.
const BUILTIN_PATTERNS: &[BuiltinPattern] = &[
    BuiltinPattern {
        pii_type: PIIType::Email,
        regex: &EMAIL_RE,
        label: "[EMAIL_REDACTED]",
    },
    BuiltinPattern {
        pii_type: PIIType::Phone,
        regex: &PHONE_RE,
        label: "[PHONE_REDACTED]",
    },
    BuiltinPattern {
        pii_type: PIIType::Ssn,
        regex: &SSN_RE,
        label: "[SSN_REDACTED]",
    },
    BuiltinPattern {
        pii_type: PIIType::CreditCard,
        regex: &CREDIT_CARD_RE,
        label: "[CC_REDACTED]",
    },
    BuiltinPattern {
        pii_type: PIIType::IpAddress,
        regex: &IP_RE,
        label: "[IP_REDACTED]",
    },
];

// ── Custom pattern registry ──────────────────────────────────

struct CustomPattern {
    name: String,
    regex: Regex,
    label: String,
}

/// Serializable view of a registered custom pattern.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CustomPatternInfo {
    pub name: String,
    pub pattern: String,
    pub label: String,
}

/// The PII engine. Owns the custom-pattern registry; built-ins are compiled
/// once per process.
pub struct PiiDetector {
    custom: Mutex<Vec<CustomPattern>>,
}

impl PiiDetector {
    pub fn new() -> Self {
        Self {
            custom: Mutex::new(Vec::new()),
        }
    }

    /// Register a custom pattern. Returns false only when the regex fails to
    /// compile; the registry is left unchanged in that case.
    pub fn add_custom(&self, name: &str, pattern: &str, label: Option<&str>) -> bool {
        let regex = match regex::RegexBuilder::new(pattern)
            .size_limit(1_000_000)
            .build()
        {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(name, error = %e, "rejected invalid custom PII pattern");
                return false;
            }
        };
        let label = label
            .map(String::from)
            .unwrap_or_else(|| format!("[{}_REDACTED]", name.to_uppercase()));
        self.custom.lock().unwrap().push(CustomPattern {
            name: name.to_string(),
            regex,
            label,
        });
        true
    }

    /// Remove every custom pattern with the given name.
    pub fn remove_custom(&self, name: &str) -> bool {
        let mut custom = self.custom.lock().unwrap();
        let before = custom.len();
        custom.retain(|p| p.name != name);
        custom.len() < before
    }

    pub fn list_custom(&self) -> Vec<CustomPatternInfo> {
        self.custom
            .lock()
            .unwrap()
            .iter()
            .map(|p| CustomPatternInfo {
                name: p.name.clone(),
                pattern: p.regex.as_str().to_string(),
                label: p.label.clone(),
            })
            .collect()
    }

    /// Scan `text` for every enabled built-in type, then apply all registered
    /// custom patterns unconditionally.
    pub fn detect(&self, text: &str, rules: &[PIIRule]) -> Vec<PIIMatch> {
        let mut matches = Vec::new();

        for builtin in BUILTIN_PATTERNS {
            let enabled = rules
                .iter()
                .any(|r| r.enabled && r.pii_type == builtin.pii_type);
            if !enabled {
                continue;
            }
            for m in builtin.regex.find_iter(text) {
                matches.push(PIIMatch {
                    pii_type: builtin.pii_type,
                    value: m.as_str().to_string(),
                    redacted: builtin.label.to_string(),
                    position: char_span(text, m.start(), m.end()),
                });
            }
        }

        for custom in self.custom.lock().unwrap().iter() {
            for m in custom.regex.find_iter(text) {
                matches.push(PIIMatch {
                    pii_type: PIIType::Custom,
                    value: m.as_str().to_string(),
                    redacted: custom.label.clone(),
                    position: char_span(text, m.start(), m.end()),
                });
            }
        }

        matches
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace every matched span with its redaction label. Matches are applied
/// in descending start order so earlier positions stay valid as the string
/// changes length.
pub fn redact(text: &str, matches: &[PIIMatch]) -> String {
    let mut sorted: Vec<&PIIMatch> = matches.iter().collect();
    sorted.sort_by(|a, b| b.position.0.cmp(&a.position.0));

    let mut chars: Vec<char> = text.chars().collect();
    for m in sorted {
        let (start, end) = m.position;
        if start >= end || end > chars.len() {
            continue;
        }
        chars.splice(start..end, m.redacted.chars());
    }
    chars.into_iter().collect()
}

/// True iff any match's type has a rule with action `block`.
pub fn should_block(matches: &[PIIMatch], rules: &[PIIRule]) -> bool {
    matches.iter().any(|m| {
        rules
            .iter()
            .any(|r| r.pii_type == m.pii_type && r.action == RuleAction::Block)
    })
}

/// Convert a byte span from the regex engine into a code-point span.
fn char_span(text: &str, byte_start: usize, byte_end: usize) -> (usize, usize) {
    let start = text[..byte_start].chars().count();
    let end = start + text[byte_start..byte_end].chars().count();
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SecurityRules;

    fn rules() -> Vec<PIIRule> {
        SecurityRules::default().pii_rules
    }

    fn detector() -> PiiDetector {
        PiiDetector::new()
    }

    #[test]
    fn detects_email() {
        let matches = detector().detect("contact me at leak@test.com please", &rules());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pii_type, PIIType::Email);
        assert_eq!(matches[0].value, "leak@test.com");
        assert_eq!(matches[0].redacted, "[EMAIL_REDACTED]");
    }

    #[test]
    fn bare_seven_digits_is_not_a_phone() {
        let matches = detector().detect("my lucky number is 1234567", &rules());
        assert!(matches.iter().all(|m| m.pii_type != PIIType::Phone));
    }

    #[test]
    fn separator_shaped_phones_match() {
        let d = detector();
        for text in ["call 555-123-4567", "call (555) 123-4567", "call +1 555.123.4567"] {
            let matches = d.detect(text, &rules());
            assert!(
                matches.iter().any(|m| m.pii_type == PIIType::Phone),
                "no phone match in {text:?}"
            );
        }
    }

    #[test]
    fn redaction_replaces_span_and_leaves_rest() {
        let d = detector();
        let text = "My email is leak@test.com ok";
        let matches = d.detect(text, &rules());
        let out = redact(text, &matches);
        assert_eq!(out, "My email is [EMAIL_REDACTED] ok");
    }

    #[test]
    fn redaction_is_position_safe_with_multiple_matches() {
        let d = detector();
        let text = "a@b.io then 123-45-6789 then 10.0.0.1";
        let matches = d.detect(text, &rules());
        let out = redact(text, &matches);
        assert_eq!(
            out,
            "[EMAIL_REDACTED] then [SSN_REDACTED] then [IP_REDACTED]"
        );
    }

    #[test]
    fn redaction_handles_multibyte_prefix() {
        let d = detector();
        let text = "héllo wörld → a@b.io";
        let matches = d.detect(text, &rules());
        assert_eq!(matches.len(), 1);
        let out = redact(text, &matches);
        assert_eq!(out, "héllo wörld → [EMAIL_REDACTED]");
    }

    #[test]
    fn redacted_output_is_stable_under_rescan() {
        let d = detector();
        let text = "mail a@b.io now";
        let once = redact(text, &d.detect(text, &rules()));
        let twice = redact(&once, &d.detect(&once, &rules()));
        assert_eq!(once, twice);
    }

    #[test]
    fn disabled_type_is_skipped() {
        let mut rules = rules();
        for r in &mut rules {
            if r.pii_type == PIIType::Email {
                r.enabled = false;
            }
        }
        let matches = detector().detect("a@b.io", &rules);
        assert!(matches.is_empty());
    }

    #[test]
    fn should_block_only_on_block_action() {
        let d = detector();
        let rules = rules();
        let ssn = d.detect("SSN: 123-45-6789", &rules);
        assert!(should_block(&ssn, &rules));
        let email = d.detect("a@b.io", &rules);
        assert!(!should_block(&email, &rules));
    }

    #[test]
    fn custom_pattern_lifecycle() {
        let d = detector();
        assert!(!d.add_custom("broken", r"([unclosed", None));
        assert!(d.list_custom().is_empty());

        assert!(d.add_custom("employee_id", r"EMP-\d{6}", None));
        let listed = d.list_custom();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].label, "[EMPLOYEE_ID_REDACTED]");

        let matches = d.detect("badge EMP-123456", &rules());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pii_type, PIIType::Custom);
        assert_eq!(matches[0].redacted, "[EMPLOYEE_ID_REDACTED]");

        assert!(d.remove_custom("employee_id"));
        assert!(!d.remove_custom("employee_id"));
    }

    #[test]
    fn custom_matches_never_block() {
        let d = detector();
        d.add_custom("badge", r"EMP-\d{6}", None);
        let rules = rules();
        let matches = d.detect("EMP-999999", &rules);
        assert_eq!(matches.len(), 1);
        assert!(!should_block(&matches, &rules));
    }

    #[test]
    fn credit_card_groups_match() {
        let matches = detector().detect("card 4111-1111-1111-1111", &rules());
        assert!(matches.iter().any(|m| m.pii_type == PIIType::CreditCard));
    }
}
