//! Regex-based PII detection and reversible masking.
//!
//! Patterns are ordered so the more specific ones run first — SSNs and credit cards would
//! otherwise be swallowed by the looser phone-number patterns.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// One entry in the fixed, ordered pattern set.
struct PiiPattern {
    label: &'static str,
    regex: fn() -> &'static Regex,
}

macro_rules! lazy_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            CELL.get_or_init(|| Regex::new($pattern).expect("static PII pattern is valid"))
        }
    };
}

// SSN and credit-card are checked before the looser phone patterns: longer, more specific
// patterns are applied first so they aren't shadowed by a looser one matching the same digits.
lazy_regex!(ssn_re, r"\b\d{3}-\d{2}-\d{4}\b");
lazy_regex!(credit_card_re, r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b");
lazy_regex!(passport_re, r"\b[A-Za-z]{1,2}\d{6,9}\b");
lazy_regex!(email_re, r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b");
lazy_regex!(
    phone_re,
    r"\b(?:\(\d{3}\)\s?\d{3}-\d{4}|\d{3}-\d{3}-\d{4}|\d{3}\.\d{3}\.\d{4}|\+\d{1,2}\s?\d{3}\s?\d{3}\s?\d{4})\b"
);
lazy_regex!(ipv4_re, r"\b(?:\d{1,3}\.){3}\d{1,3}\b");
lazy_regex!(date_re, r"\b(?:\d{1,2}/\d{1,2}/\d{4}|\d{1,2}-\d{1,2}-\d{2})\b");
lazy_regex!(
    address_re,
    r"\b\d{1,6}\s+[A-Za-z0-9.'\s]+?\s(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way)\b"
);

fn ordered_patterns() -> &'static [PiiPattern] {
    static PATTERNS: OnceLock<Vec<PiiPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            PiiPattern { label: "SSN", regex: ssn_re },
            PiiPattern { label: "CREDIT_CARD", regex: credit_card_re },
            PiiPattern { label: "PASSPORT", regex: passport_re },
            PiiPattern { label: "EMAIL", regex: email_re },
            PiiPattern { label: "PHONE", regex: phone_re },
            PiiPattern { label: "IPV4", regex: ipv4_re },
            PiiPattern { label: "DATE", regex: date_re },
            PiiPattern { label: "ADDRESS", regex: address_re },
        ]
    })
}

/// Maps placeholder tokens (e.g. `⟨EMAIL_1⟩`) back to the original substring they replaced.
/// Intra-request only: the orchestrator discards this once the response is produced.
pub type RedactionMap = HashMap<String, String>;

/// `redact(text) → (masked_text, map)`.
///
/// Applies the ordered pattern set once per label, left to right through the text, so a
/// substring already claimed by an earlier (more specific) pattern is never reconsidered by a
/// later, looser one.
pub fn redact(text: &str) -> (String, RedactionMap) {
    let mut masked = text.to_string();
    let mut map = RedactionMap::new();

    for pattern in ordered_patterns() {
        let re = (pattern.regex)();
        let mut counter = 0usize;
        let mut out = String::with_capacity(masked.len());
        let mut last_end = 0;
        for m in re.find_iter(&masked) {
            counter += 1;
            let placeholder = format!("\u{27E8}{}_{}\u{27E9}", pattern.label, counter);
            out.push_str(&masked[last_end..m.start()]);
            out.push_str(&placeholder);
            map.insert(placeholder, m.as_str().to_string());
            last_end = m.end();
        }
        out.push_str(&masked[last_end..]);
        masked = out;
    }

    (masked, map)
}

/// Restore every placeholder in `text` using `map`. Placeholders with no entry in `map` are
/// left as-is (they did not originate from this request's redaction pass).
pub fn unredact(text: &str, map: &RedactionMap) -> String {
    let mut result = text.to_string();
    for (placeholder, original) in map {
        result = result.replace(placeholder, original);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email_and_ssn() {
        let (masked, map) = redact("my email is a@b.co and ssn 123-45-6789");
        assert!(masked.contains("\u{27E8}EMAIL_1\u{27E9}"));
        assert!(masked.contains("\u{27E8}SSN_1\u{27E9}"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn round_trip_restores_originals() {
        let original = "contact bob@example.com or call 555-123-4567, ssn 987-65-4321";
        let (masked, map) = redact(original);
        assert_ne!(masked, original);
        let restored = unredact(&masked, &map);
        assert_eq!(restored, original);
    }

    #[test]
    fn ssn_pattern_runs_before_phone_pattern() {
        let (masked, map) = redact("ssn is 123-45-6789");
        assert!(masked.contains("SSN_1"));
        assert!(!masked.contains("PHONE"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn text_without_pii_is_untouched() {
        let (masked, map) = redact("nothing sensitive here");
        assert_eq!(masked, "nothing sensitive here");
        assert!(map.is_empty());
    }

    #[test]
    fn multiple_instances_of_same_label_get_distinct_placeholders() {
        let (masked, map) = redact("emails: a@b.co and c@d.co");
        assert!(masked.contains("EMAIL_1"));
        assert!(masked.contains("EMAIL_2"));
        assert_eq!(map.len(), 2);
    }
}
