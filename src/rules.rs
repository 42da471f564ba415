//! Rules Engine (§4.8) — thin orchestration over `canonical`'s structured and
//! script paths, adding the `validate` contract: `normalize(input)` plus a
//! success flag and errors/warnings.

use serde_json::Value;

use crate::canonical::script::{normalize_script, ScriptMetadata};
use crate::canonical::structured::canonicalize;
use crate::canonical::{CanonError, ValidationOutcome};

/// Normalizes a structured value; pure function of the input (§4.8).
pub fn normalize_params(value: &Value, prompt_mode: bool) -> Vec<u8> {
    canonicalize(value, prompt_mode)
}

/// `validate(input)` for structured params: normalization cannot itself fail
/// for well-formed JSON, so this always succeeds; reserved for future
/// semantic checks (e.g. required-field enforcement by call site).
pub fn validate_params(value: &Value, prompt_mode: bool) -> ValidationOutcome<Vec<u8>> {
    ValidationOutcome::ok(normalize_params(value, prompt_mode))
}

/// Normalizes a CAD script; pure function of the input.
pub fn normalize_script_input(source: &str) -> Result<(String, ScriptMetadata), CanonError> {
    normalize_script(source)
}

/// `validate(input)` for scripts: normalization plus success/errors.
pub fn validate_script(source: &str) -> ValidationOutcome<(String, ScriptMetadata)> {
    match normalize_script(source) {
        Ok(pair) => ValidationOutcome::ok(pair),
        Err(e) => ValidationOutcome::failed(vec![e]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_params_is_pure() {
        let v = json!({"x": 1});
        let a = validate_params(&v, false);
        let b = validate_params(&v, false);
        assert_eq!(a.normalized, b.normalized);
    }

    #[test]
    fn validate_script_surfaces_errors() {
        let out = validate_script("import subprocess\nbody = Body()\n");
        assert!(!out.success);
        assert_eq!(out.errors[0].code(), "invalid_syntax");
    }

    #[test]
    fn validate_params_masks_pii_in_prompt_mode() {
        let v = json!("ssn 123-45-6789 on file");
        let out = validate_params(&v, true);
        assert!(out.success);
        let s = String::from_utf8(out.normalized).unwrap();
        assert!(s.contains("[SSN]"), "got: {s}");
    }
}
