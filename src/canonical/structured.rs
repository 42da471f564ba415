//! Structured-value canonicalization (§4.2 "Structured path rules", §3 "Canonical Form").
//!
//! Produces a compact, ASCII-only, deterministic JSON-equivalent byte string:
//! keys sorted ascending at every level, empty values dropped, floats rounded
//! to 1e-6 with sub-1e-10 clamped to zero, strings NFKC-normalized with
//! whitespace collapsed.

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use super::pii::mask_and_lowercase;

const ROUND_DECIMALS: i32 = 6;
const CLAMP_THRESHOLD: f64 = 1e-10;

/// Rounds `f` to 6 decimal places (half-up), clamping magnitudes below 1e-10 to 0.
/// Grounded in §3/§4.2/P3.
pub fn round_float(f: f64) -> f64 {
    let scale = 10f64.powi(ROUND_DECIMALS);
    let rounded = (f * scale).round() / scale;
    if rounded.abs() < CLAMP_THRESHOLD {
        0.0
    } else {
        rounded
    }
}

/// NFKC-normalizes a string and collapses runs of whitespace to a single space,
/// trimming the ends.
pub fn normalize_string(s: &str) -> String {
    let nfkc: String = s.nfkc().collect();
    let mut out = String::with_capacity(nfkc.len());
    let mut last_was_space = false;
    for c in nfkc.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Recursively drops empty values, sorts map keys, rounds floats, and
/// NFKC-normalizes strings. Returns `None` if the top-level value is itself
/// empty. `depth` tracks nesting so `prompt_mode` PII-masking/lowercasing can
/// apply only to top-level (`depth == 0`) string values, mirroring the
/// original service's `is_prompt and depth == 0` gate — it must run on the
/// raw string, before JSON serialization wraps it in quotes.
fn canonicalize_value(v: &Value, prompt_mode: bool, depth: usize) -> Option<Value> {
    if is_empty_value(v) {
        return None;
    }
    match v {
        Value::Bool(_) | Value::Null => Some(v.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Value::from(u))
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                Some(serde_json::json!(round_float(f)))
            }
        }
        Value::String(s) => {
            let mut normalized = normalize_string(s);
            if prompt_mode && depth == 0 {
                normalized = mask_and_lowercase(&normalized);
            }
            Some(Value::String(normalized))
        }
        Value::Array(items) => {
            let mapped: Vec<Value> = items
                .iter()
                .filter_map(|item| canonicalize_value(item, prompt_mode, depth + 1))
                .collect();
            if mapped.is_empty() {
                None
            } else {
                Some(Value::Array(mapped))
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                if let Some(cv) = canonicalize_value(&map[k], prompt_mode, depth + 1) {
                    out.insert(k.clone(), cv);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        }
    }
}

/// Serializes a `Value` compactly: no whitespace between tokens, ASCII-only
/// (non-ASCII bytes are `\uXXXX`-escaped by `serde_json`'s compact writer,
/// which already satisfies the ASCII-only requirement for `to_string`).
fn serialize_compact(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "null".to_string())
}

/// Canonicalizes an arbitrary structured value into canonical bytes (§4.2).
/// `prompt_mode` additionally PII-masks and lowercases top-level free text
/// outside quoted spans, per §3.
pub fn canonicalize(value: &Value, prompt_mode: bool) -> Vec<u8> {
    let canon =
        canonicalize_value(value, prompt_mode, 0).unwrap_or(Value::Object(serde_json::Map::new()));
    serialize_compact(&canon).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idempotent() {
        let v = json!({"b": 1, "a": {"x": 1.23456789, "y": ""}, "z": null});
        let once = canonicalize(&v, false);
        let reparsed: Value = serde_json::from_slice(&once).unwrap();
        let twice = canonicalize(&reparsed, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn order_independent() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(canonicalize(&a, false), canonicalize(&b, false));
    }

    #[test]
    fn drops_empty_values() {
        let v = json!({"keep": 1, "drop_null": null, "drop_str": "", "drop_arr": [], "drop_obj": {}});
        let out = canonicalize(&v, false);
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, r#"{"keep":1}"#);
    }

    #[test]
    fn float_rounding_and_clamp() {
        assert_eq!(round_float(1.0000001), 1.0);
        assert_eq!(round_float(0.00000000001), 0.0);
        assert_eq!(round_float(2.5), 2.5);
    }

    #[test]
    fn no_spaces_in_output() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        let out = canonicalize(&v, false);
        assert!(!String::from_utf8(out).unwrap().contains(' '));
    }

    #[test]
    fn prompt_mode_masks_and_lowercases_top_level_string() {
        let v = json!("Contact Jane at JANE.DOE@EXAMPLE.COM Please");
        let out = canonicalize(&v, true);
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("[EMAIL]"), "got: {s}");
        assert!(s.contains("contact jane at"), "got: {s}");
    }

    #[test]
    fn prompt_mode_leaves_nested_strings_untouched() {
        let v = json!({"note": "Keep CasE and JANE.DOE@EXAMPLE.COM"});
        let out = canonicalize(&v, true);
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("Keep CasE and JANE.DOE@EXAMPLE.COM"), "got: {s}");
    }
}
