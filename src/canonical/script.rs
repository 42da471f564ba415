//! CAD-script canonicalization (§4.2 "Script path").
//!
//! The engine scripts this crate normalizes are small, line-oriented
//! FreeCAD-style programs (assignments, API calls, comments). Rather than a
//! full language grammar, syntax is validated line-by-line with structured
//! line/column errors, matching the original rules engine's tokenizing
//! approach; this keeps the parser dependency-free and deterministic.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::registry::{ALLOWED_IMPORTS, API_REGISTRY, DEPRECATED_APIS, FORBIDDEN_NAMES};
use super::{CanonError, CanonResult};

/// Maximum number of lines walked before `TimeoutError` fires — a defensive
/// step-budget cap, not a real CAD timeout (see SPEC_FULL.md §4.2 supplement).
const MAX_SCRIPT_LINES: usize = 20_000;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UnitConversion {
    pub from_unit: String,
    pub to_unit: String,
    pub before: f64,
    pub after: f64,
    pub location: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScriptMetadata {
    pub modules_used: Vec<String>,
    pub conversions_applied: Vec<UnitConversion>,
    pub api_warnings: Vec<String>,
    pub dims_mm: BTreeMap<String, f64>,
    pub script_hash: String,
    pub partdesign_features: BTreeMap<String, usize>,
    pub sketches: usize,
    pub bodies: usize,
    pub datums: usize,
    pub booleans: usize,
}

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*import\s+([A-Za-z0-9_.]+)").unwrap());
static CM_ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)([A-Za-z_][A-Za-z0-9_]*)_cm\s*=\s*(-?[0-9]+(?:\.[0-9]+)?)\s*$").unwrap());
static INCH_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)([A-Za-z_][A-Za-z0-9_]*)_inch\s*=\s*(-?[0-9]+(?:\.[0-9]+)?)\s*$").unwrap()
});
static CM_FN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"cm\((-?[0-9]+(?:\.[0-9]+)?)\)").unwrap());
static INCH_FN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"inch\((-?[0-9]+(?:\.[0-9]+)?)\)").unwrap());
static TRAILING_UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*[A-Za-z_][A-Za-z0-9_]*\s*=\s*)(-?[0-9]+(?:\.[0-9]+)?)\s*#\s*(cm|inch)\s*$").unwrap()
});
static CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+)\s*\(([^)]*)\)").unwrap());
static BODY_FEATURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(Pad|Pocket|Revolution|LinearPattern|PolarPattern)\b").unwrap());
static SKETCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bSketch(er)?\b").unwrap());
static BODY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bBody\b").unwrap());
static DATUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bDatum(Plane|Line|Point)\b").unwrap());
static BOOLEAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(makeFuse|makeCut|makeCommon)\s*\(([^)]*)\)").unwrap());

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

/// Formats a millimeter literal for the canonical script. `f64`'s `Display`
/// drops the trailing `.0` on whole numbers, but canonical scripts must keep
/// literals recognizably floating-point (e.g. `25.0`, not `25`).
fn format_mm(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn translate_comment(line: &str) -> String {
    if let Some(idx) = line.find('#') {
        let (code, comment) = line.split_at(idx);
        let mut translated = comment.to_string();
        for (term, english) in super::registry::COMMENT_GLOSSARY.iter() {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
            if let Ok(re) = Regex::new(&pattern) {
                translated = re.replace_all(&translated, *english).into_owned();
            }
        }
        format!("{code}{translated}")
    } else {
        line.to_string()
    }
}

/// Canonicalizes a raw CAD script: validates imports/forbidden names, rewrites
/// unit literals to mm, translates comments, extracts metadata, and validates
/// API calls against the registry. Returns the canonical script text plus the
/// extracted `ScriptMetadata` per §4.2.
pub fn normalize_script(source: &str) -> CanonResult<(String, ScriptMetadata)> {
    let mut meta = ScriptMetadata::default();
    let mut out_lines: Vec<String> = Vec::new();
    let mut body_count = 0usize;
    let mut saw_body_or_solid = false;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        if line_no > MAX_SCRIPT_LINES {
            return Err(CanonError::TimeoutError);
        }

        if let Some(caps) = IMPORT_RE.captures(raw_line) {
            let module = caps.get(1).unwrap().as_str();
            let root = module.split('.').next().unwrap_or(module);
            if !ALLOWED_IMPORTS.contains(&root) {
                return Err(CanonError::InvalidSyntax {
                    line: line_no,
                    column: 1,
                    message: format!("import of `{module}` is not on the allow-list"),
                });
            }
            if !meta.modules_used.iter().any(|m| m == root) {
                meta.modules_used.push(root.to_string());
            }
        }

        for forbidden in FORBIDDEN_NAMES.iter() {
            if line_contains_identifier(raw_line, forbidden) {
                return Err(CanonError::SecurityViolation {
                    name: (*forbidden).to_string(),
                });
            }
        }

        let mut line = raw_line.to_string();

        if let Some(caps) = CM_ASSIGN_RE.captures(&line) {
            let indent = &caps[1];
            let name = &caps[2];
            let before: f64 = caps[3].parse().unwrap_or(0.0);
            let after = round6(before * 10.0);
            meta.dims_mm.insert(name.to_string(), after);
            meta.conversions_applied.push(UnitConversion {
                from_unit: "cm".to_string(),
                to_unit: "mm".to_string(),
                before,
                after,
                location: line_no,
            });
            line = format!("{indent}{name} = {}", format_mm(after));
        } else if let Some(caps) = INCH_ASSIGN_RE.captures(&line) {
            let indent = &caps[1];
            let name = &caps[2];
            let before: f64 = caps[3].parse().unwrap_or(0.0);
            let after = round6(before * 25.4);
            meta.dims_mm.insert(name.to_string(), after);
            meta.conversions_applied.push(UnitConversion {
                from_unit: "inch".to_string(),
                to_unit: "mm".to_string(),
                before,
                after,
                location: line_no,
            });
            line = format!("{indent}{name} = {}", format_mm(after));
        } else if let Some(caps) = TRAILING_UNIT_RE.captures(&line) {
            let prefix = &caps[1];
            let before: f64 = caps[2].parse().unwrap_or(0.0);
            let unit = &caps[3];
            let after = if unit == "cm" {
                round6(before * 10.0)
            } else {
                round6(before * 25.4)
            };
            meta.conversions_applied.push(UnitConversion {
                from_unit: unit.to_string(),
                to_unit: "mm".to_string(),
                before,
                after,
                location: line_no,
            });
            line = format!("{prefix}{}", format_mm(after));
        }

        line = CM_FN_RE
            .replace_all(&line, |c: &regex::Captures| {
                let before: f64 = c[1].parse().unwrap_or(0.0);
                format_mm(round6(before * 10.0))
            })
            .into_owned();
        line = INCH_FN_RE
            .replace_all(&line, |c: &regex::Captures| {
                let before: f64 = c[1].parse().unwrap_or(0.0);
                format_mm(round6(before * 25.4))
            })
            .into_owned();

        line = translate_comment(&line);

        if BODY_RE.is_match(&line) {
            meta.bodies += 1;
            body_count += 1;
            saw_body_or_solid = true;
        }
        if SKETCH_RE.is_match(&line) {
            meta.sketches += 1;
        }
        if DATUM_RE.is_match(&line) {
            meta.datums += 1;
        }
        for cap in BODY_FEATURE_RE.captures_iter(&line) {
            *meta.partdesign_features.entry(cap[1].to_string()).or_insert(0) += 1;
        }
        if let Some(caps) = BOOLEAN_RE.captures(&line) {
            let op = caps[1].to_string();
            let args = caps[2].to_string();
            let arg_count = if args.trim().is_empty() {
                0
            } else {
                args.split(',').count()
            };
            if arg_count < 2 {
                return Err(CanonError::BooleanBodyError {
                    op,
                    count: arg_count,
                });
            }
            meta.booleans += 1;
            saw_body_or_solid = true;
        }

        for caps in CALL_RE.captures_iter(&line) {
            let name = &caps[1];
            if let Some(sig) = API_REGISTRY.get(name) {
                let args = &caps[2];
                let arg_count = if args.trim().is_empty() {
                    0
                } else {
                    args.split(',').count()
                };
                if arg_count < sig.min_args || arg_count > sig.max_args {
                    meta.api_warnings.push(format!(
                        "{name} called with {arg_count} args, expected {}..{}",
                        sig.min_args, sig.max_args
                    ));
                }
            } else if let Some(suggestion) = DEPRECATED_APIS.get(name) {
                meta.api_warnings
                    .push(format!("{name} is deprecated: {suggestion}"));
            } else if name.contains('.') && !name.starts_with("self.") && !name.starts_with("doc.") {
                if let Some(suggestion) = super::registry::suggest_by_suffix(name) {
                    meta.api_warnings
                        .push(format!("unknown API `{name}`, did you mean `{suggestion}`?"));
                }
            }
        }

        out_lines.push(line);
    }

    if body_count == 0 && !saw_body_or_solid {
        return Err(CanonError::SingleSolidViolation { count: 0 });
    }

    if !meta.modules_used.iter().any(|m| m == "FreeCAD" || m == "App") {
        return Err(CanonError::MissingRequired {
            field: "import FreeCAD as App".to_string(),
        });
    }

    let mut canonical = out_lines.join("\n");
    if !canonical.ends_with('\n') {
        canonical.push('\n');
    }

    meta.script_hash = crate::cache::key::sha256_hex(canonical.as_bytes());
    Ok((canonical, meta))
}

fn line_contains_identifier(line: &str, ident: &str) -> bool {
    if let Some(pos) = line.find(ident) {
        let before_ok = pos == 0
            || !line.as_bytes()[pos - 1].is_ascii_alphanumeric() && line.as_bytes()[pos - 1] != b'_';
        let after = pos + ident.len();
        let after_ok = after >= line.len()
            || (!line.as_bytes()[after].is_ascii_alphanumeric() && line.as_bytes()[after] != b'_');
        before_ok && after_ok
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "import FreeCAD as App\nimport Part\n";

    #[test]
    fn rejects_forbidden_name() {
        let src = format!("{HEADER}os.system(\"rm -rf /\")\nbody = Body()\n");
        let err = normalize_script(&src).unwrap_err();
        assert_eq!(err.code(), "security_violation");
    }

    #[test]
    fn converts_cm_literal() {
        let src = format!("{HEADER}length_cm = 2.5\nbody = Part.makeFuse(a, b)\n");
        let (canon, meta) = normalize_script(&src).unwrap();
        assert!(canon.contains("length = 25.0"), "got: {canon}");
        assert_eq!(meta.conversions_applied.len(), 1);
        assert_eq!(meta.conversions_applied[0].after, 25.0);
    }

    #[test]
    fn rejects_disallowed_import() {
        let src = "import subprocess\nbody = Body()\n";
        let err = normalize_script(src).unwrap_err();
        assert_eq!(err.code(), "invalid_syntax");
    }

    #[test]
    fn boolean_requires_two_bodies() {
        let src = format!("{HEADER}r = Part.makeFuse(a)\n");
        let err = normalize_script(&src).unwrap_err();
        assert_eq!(err.code(), "boolean_body_error");
    }

    #[test]
    fn idempotent_on_canonical_output() {
        let src = format!("{HEADER}length_cm = 2.5\nbody = Part.makeFuse(a, b)\n");
        let (canon, _) = normalize_script(&src).unwrap();
        let (canon2, _) = normalize_script(&canon).unwrap();
        assert_eq!(canon, canon2);
    }
}
