//! Error-signature normalization and severity heuristics
//!
//! Raw error strings carry run-specific noise (ids, counts, URLs) that would
//! make every occurrence look unique. Normalization strips the parameters so
//! recurrence is detectable: UUIDs, digit runs, URLs and quoted literals all
//! collapse to placeholders, and the result is bounded at 200 characters.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::EscalationSeverity;

/// Maximum length of a normalized signature
const SIGNATURE_MAX_LEN: usize = 200;

// The patterns are literals; a failed compile is a programming error, so the
// unwraps inside the initializers are allowed per function.

#[allow(clippy::unwrap_used)]
fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    })
}

#[allow(clippy::unwrap_used)]
fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

#[allow(clippy::unwrap_used)]
fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").unwrap())
}

#[allow(clippy::unwrap_used)]
fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap())
}

/// Normalize a raw error string into its tracking signature.
///
/// Replacement order matters: UUIDs before digit runs, or the hex groups
/// would fragment into `<N>` pieces.
pub fn normalize_signature(error: &str) -> String {
    let s = uuid_re().replace_all(error, "<UUID>");
    let s = url_re().replace_all(&s, "<URL>");
    let s = quoted_re().replace_all(&s, "<STRING>");
    let s = digits_re().replace_all(&s, "<N>");

    s.chars().take(SIGNATURE_MAX_LEN).collect()
}

/// Derive escalation severity from the error text.
pub fn severity_for(error: &str) -> EscalationSeverity {
    let lower = error.to_lowercase();

    if contains_any(&lower, &["crash", "fatal", "unrecoverable", "data loss"]) {
        EscalationSeverity::Critical
    } else if contains_any(&lower, &["failed", "error", "exception"]) {
        EscalationSeverity::Error
    } else {
        EscalationSeverity::Warning
    }
}

/// True when the haystack contains any of the needles.
///
/// Callers pass an already-lowercased haystack; needles are lowercase.
pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_and_digits_collapse() {
        let a = normalize_signature(
            "Failed job 123e4567-e89b-12d3-a456-426614174000 after 42 retries",
        );
        let b = normalize_signature(
            "Failed job 00000000-1111-2222-3333-444444444444 after 7 retries",
        );
        assert_eq!(a, "Failed job <UUID> after <N> retries");
        assert_eq!(a, b);
    }

    #[test]
    fn test_url_collapses_before_digits() {
        let sig = normalize_signature("GET http://repo-host:8080/v2/manifests timed out");
        assert_eq!(sig, "GET <URL> timed out");
    }

    #[test]
    fn test_quoted_literals_collapse() {
        let sig = normalize_signature(r#"unknown branch "feature/x-42" in repo"#);
        assert_eq!(sig, "unknown branch <STRING> in repo");
    }

    #[test]
    fn test_signature_is_bounded() {
        let long = "x".repeat(500);
        assert_eq!(normalize_signature(&long).len(), 200);
    }

    #[test]
    fn test_severity_keywords() {
        assert_eq!(
            severity_for("process crash detected"),
            EscalationSeverity::Critical
        );
        assert_eq!(
            severity_for("potential data loss in replica"),
            EscalationSeverity::Critical
        );
        assert_eq!(
            severity_for("request failed with exception"),
            EscalationSeverity::Error
        );
        assert_eq!(severity_for("disk is purple"), EscalationSeverity::Warning);
    }
}
