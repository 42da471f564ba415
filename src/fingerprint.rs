//! Engine Fingerprint (§3, §4.1) — stable process-lifetime identity of the
//! CAD engine build+config, bound into every cache key.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

static GLOBAL_FINGERPRINT: OnceCell<EngineFingerprint> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFingerprint {
    pub engine_version: String,
    pub kernel_version: String,
    pub runtime_version: String,
    pub mesh_schema_tag: String,
    pub build_commit: String,
    pub feature_modules: Vec<String>,
    pub feature_flags: Vec<(String, String)>,
}

impl EngineFingerprint {
    pub fn new(
        engine_version: impl Into<String>,
        kernel_version: impl Into<String>,
        runtime_version: impl Into<String>,
        mesh_schema_tag: impl Into<String>,
        build_commit: impl Into<String>,
        mut feature_modules: Vec<String>,
        mut feature_flags: Vec<(String, String)>,
    ) -> Self {
        feature_modules.sort();
        feature_flags.sort_by(|a, b| a.0.cmp(&b.0));
        let commit = build_commit.into();
        let commit7: String = commit.chars().take(7).collect();
        Self {
            engine_version: engine_version.into(),
            kernel_version: kernel_version.into(),
            runtime_version: runtime_version.into(),
            mesh_schema_tag: mesh_schema_tag.into(),
            build_commit: commit7,
            feature_modules,
            feature_flags,
        }
    }

    /// Builds a fingerprint from process configuration and compile-time constants.
    /// `build_commit` is read from `MGF_BUILD_COMMIT`, defaulting to `"unknown"`.
    pub fn from_env(kernel_version: impl Into<String>, runtime_version: impl Into<String>) -> Self {
        let commit = std::env::var("MGF_BUILD_COMMIT").unwrap_or_else(|_| "unknown".to_string());
        Self::new(
            env!("CARGO_PKG_VERSION"),
            kernel_version,
            runtime_version,
            "v1",
            commit,
            Vec::new(),
            Vec::new(),
        )
    }

    /// Stable ASCII identifier: `fc{…}-kernel{…}-rt{…}-mesh{…}-git{…}-wb{…}-flags{…}`.
    /// Any change in any field produces a different string.
    pub fn to_string_id(&self) -> String {
        let modules = self.feature_modules.join(",");
        let flags = self
            .feature_flags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "fc{{{}}}-kernel{{{}}}-rt{{{}}}-mesh{{{}}}-git{{{}}}-wb{{{}}}-flags{{{}}}",
            self.engine_version,
            self.kernel_version,
            self.runtime_version,
            self.mesh_schema_tag,
            self.build_commit,
            modules,
            flags
        )
    }

    /// Bounded-length prefix used inside cache keys (§6: `engine_prefix[≤20]`).
    pub fn prefix(&self) -> String {
        let id = self.to_string_id();
        id.chars().take(20).collect()
    }
}

impl std::fmt::Display for EngineFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_id())
    }
}

/// Initializes the process-wide singleton. Idempotent: subsequent calls are
/// no-ops if already initialized (mirrors the "constructed at startup" note in §9).
pub fn init(fp: EngineFingerprint) {
    let _ = GLOBAL_FINGERPRINT.set(fp);
}

/// Returns the process-wide fingerprint. Panics if `init` was never called —
/// this is a programmer error, not a recoverable condition.
pub fn get() -> &'static EngineFingerprint {
    GLOBAL_FINGERPRINT
        .get()
        .expect("EngineFingerprint::init must be called at process startup")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EngineFingerprint {
        EngineFingerprint::new(
            "1.2.3",
            "occt-7.7",
            "py3.11",
            "v2",
            "abcdef1234",
            vec!["partdesign".to_string(), "sketcher".to_string()],
            vec![("ai".to_string(), "on".to_string())],
        )
    }

    #[test]
    fn commit_truncated_to_seven_chars() {
        assert_eq!(sample().build_commit, "abcdef1");
    }

    #[test]
    fn any_field_change_changes_the_string() {
        let a = sample();
        let mut b = sample();
        b.kernel_version = "occt-7.8".to_string();
        assert_ne!(a.to_string_id(), b.to_string_id());
    }

    #[test]
    fn feature_modules_and_flags_are_sorted() {
        let fp = sample();
        assert_eq!(fp.feature_modules, vec!["partdesign", "sketcher"]);
    }

    #[test]
    fn prefix_is_bounded() {
        let fp = sample();
        assert!(fp.prefix().chars().count() <= 20);
    }
}
