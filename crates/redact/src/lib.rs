//! vault_redact
//!
//! Regex-based PII masking for redacted exports and previews.
//! - Detection is deterministic: fixed pattern set, scanned case-insensitively
//! - Masking replaces right-to-left by start offset so match indices stay
//!   valid while the text shrinks
//!
//! Detected segments become bracketed labels: `[EMAIL]`, `[PHONE]`, ...

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PiiEntity {
    pub label: &'static str,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

struct Pattern {
    label: &'static str,
    regex: Regex,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |label, pattern: &str| Pattern {
            label,
            regex: Regex::new(&format!("(?i){pattern}")).expect("pattern compiles"),
        };
        vec![
            compile("EMAIL", r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+"),
            compile("CREDIT_CARD", r"\b(?:\d[ -]*?){13,16}\b"),
            compile("IPV4", r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b"),
            compile("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
            compile("PHONE", r"\b(?:\+?\d{1,3}[- ]?)?\(?\d{3}\)?[- ]?\d{3}[- ]?\d{4}\b"),
            compile("IBAN", r"\b[A-Z]{2}\d{2}[A-Z\d]{4}\d{7}(?:[A-Z\d]?){0,16}\b"),
            compile("SECRET_KEY", r"\b(?:AWS|KEY|SECRET|TOKEN|API)([A-Z0-9/=+-]{20,})\b"),
        ]
    })
}

/// Scan for PII segments. Overlapping matches from different patterns are all
/// reported; masking resolves the overlap by processing from the end.
pub fn identify_pii(text: &str) -> Vec<PiiEntity> {
    let mut found = Vec::new();
    if text.is_empty() {
        return found;
    }
    for pattern in patterns() {
        for m in pattern.regex.find_iter(text) {
            found.push(PiiEntity {
                label: pattern.label,
                start: m.start(),
                end: m.end(),
                text: m.as_str().to_string(),
            });
        }
    }
    found
}

/// Replace every detected segment with its bracketed label.
pub fn redact_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut found = identify_pii(text);
    // Overlaps collapse to one label: earliest start wins, longest match
    // breaks ties (a card number beats the phone-shaped run inside it).
    found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    let mut kept: Vec<PiiEntity> = Vec::new();
    let mut covered_end = 0usize;
    for entity in found {
        if entity.start >= covered_end {
            covered_end = entity.end;
            kept.push(entity);
        }
    }

    // Replace right-to-left so earlier offsets stay valid as the text shrinks.
    let mut redacted = text.to_string();
    for entity in kept.iter().rev() {
        redacted.replace_range(entity.start..entity.end, &format!("[{}]", entity.label));
    }
    redacted
}
