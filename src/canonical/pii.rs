//! PII masking for prompt-mode canonicalization (§3, §4.2).
//!
//! Masks email/phone/card/SSN-shaped substrings with placeholders, then
//! lowercases everything outside quoted spans (both `'` and `"`, properly paired).

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d{1,3}[\s.-]?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}").unwrap());
static CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

fn mask_patterns(input: &str) -> String {
    let masked = EMAIL_RE.replace_all(input, "[EMAIL]");
    let masked = SSN_RE.replace_all(&masked, "[SSN]");
    let masked = CARD_RE.replace_all(&masked, "[CARD]");
    let masked = PHONE_RE.replace_all(&masked, "[PHONE]");
    masked.into_owned()
}

/// Lowercases all characters outside quoted spans. Supports both single and
/// double quotes with proper pairing; an unterminated quote lowercases the
/// remainder (fail-open, matching the "defensive, never crash" posture used
/// throughout the canonicalizer).
fn lowercase_outside_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    out.push(c);
                } else {
                    out.extend(c.to_lowercase());
                }
            }
        }
    }
    out
}

/// Applies PII masking first (pattern matches are case-sensitive enough to be
/// stable regardless of later casing), then lowercases outside quoted spans.
pub fn mask_and_lowercase(input: &str) -> String {
    let masked = mask_patterns(input);
    lowercase_outside_quotes(&masked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_email() {
        let out = mask_and_lowercase("contact Jane at jane.doe@example.com please");
        assert!(out.contains("[EMAIL]"));
        assert!(!out.contains("jane.doe@example.com"));
    }

    #[test]
    fn preserves_quoted_case() {
        let out = lowercase_outside_quotes(r#"Name is "John Smith" OK"#);
        assert!(out.contains("\"John Smith\""));
        assert!(out.starts_with("name is"));
    }

    #[test]
    fn masks_ssn() {
        let out = mask_and_lowercase("ssn 123-45-6789 on file");
        assert!(out.contains("[SSN]"));
    }
}
