//! FreeCAD-like API registry, import allow-list, forbidden names, and the
//! comment glossary used by the script canonicalizer (§4.2 steps 2, 4, 7).
//!
//! Grounded on `FreeCADRulesEngine`'s `ALLOWED_IMPORTS`, `FORBIDDEN_NAMES`,
//! `SKETCHER_CONSTRAINTS`, `FREECAD_API_REGISTRY`, and `DEPRECATED_APIS`
//! class constants in the original script-normalization service.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// `(min_args, max_args, category)`.
#[derive(Debug, Clone, Copy)]
pub struct ApiSignature {
    pub min_args: usize,
    pub max_args: usize,
    pub category: &'static str,
}

pub static ALLOWED_IMPORTS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["FreeCAD", "App", "Part", "Sketcher", "Draft", "math", "numpy", "np"]);

pub static FORBIDDEN_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "__import__",
        "exec",
        "eval",
        "open",
        "os",
        "subprocess",
        "sys.exit",
        "compile",
        "globals",
        "locals",
    ]
});

pub static SKETCHER_CONSTRAINTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Distance",
        "Angle",
        "Coincident",
        "Parallel",
        "Perpendicular",
        "Horizontal",
        "Vertical",
        "Tangent",
        "Equal",
        "Symmetric",
    ]
});

pub static API_REGISTRY: Lazy<HashMap<&'static str, ApiSignature>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "Part.makeBox",
        ApiSignature {
            min_args: 3,
            max_args: 4,
            category: "primitive",
        },
    );
    m.insert(
        "Part.makeCylinder",
        ApiSignature {
            min_args: 2,
            max_args: 5,
            category: "primitive",
        },
    );
    m.insert(
        "Part.makeSphere",
        ApiSignature {
            min_args: 1,
            max_args: 4,
            category: "primitive",
        },
    );
    m.insert(
        "Part.makeCone",
        ApiSignature {
            min_args: 3,
            max_args: 5,
            category: "primitive",
        },
    );
    m.insert(
        "Part.Circle",
        ApiSignature {
            min_args: 0,
            max_args: 3,
            category: "sketch",
        },
    );
    m.insert(
        "body.newObject",
        ApiSignature {
            min_args: 2,
            max_args: 2,
            category: "partdesign",
        },
    );
    m.insert(
        "Part.makeFuse",
        ApiSignature {
            min_args: 2,
            max_args: 2,
            category: "boolean",
        },
    );
    m.insert(
        "Part.makeCut",
        ApiSignature {
            min_args: 2,
            max_args: 2,
            category: "boolean",
        },
    );
    m
});

pub static DEPRECATED_APIS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("Part.makeCircle", "Use Part.Circle instead");
    m.insert("Draft.makeRectangle", "Use Draft.make_rectangle instead");
    m
});

/// Token-boundary-aware domain glossary for comment translation (§4.2 step 4).
/// Generic replacement table; entries are matched as whole words only.
pub static COMMENT_GLOSSARY: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("genislik", "width");
    m.insert("yukseklik", "height");
    m.insert("derinlik", "depth");
    m.insert("yaricap", "radius");
    m.insert("kalinlik", "thickness");
    m
});

/// Suggests the closest registry entry by suffix match, used to flag likely typos.
pub fn suggest_by_suffix(name: &str) -> Option<&'static str> {
    API_REGISTRY
        .keys()
        .find(|candidate| {
            let suffix_len = candidate.len().min(name.len());
            suffix_len >= 4 && candidate.ends_with(&name[name.len() - suffix_len..])
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_expected_entries() {
        assert!(API_REGISTRY.contains_key("Part.makeBox"));
        assert_eq!(API_REGISTRY["Part.makeBox"].min_args, 3);
    }

    #[test]
    fn deprecated_lookup() {
        assert_eq!(DEPRECATED_APIS.get("Part.makeCircle"), Some(&"Use Part.Circle instead"));
    }

    #[test]
    fn forbidden_names_include_exec() {
        assert!(FORBIDDEN_NAMES.contains(&"exec"));
    }
}
