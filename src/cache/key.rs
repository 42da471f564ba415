//! Cache Key Generator (§4.3, §6). Pure functions only — no I/O, no state.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::fingerprint::EngineFingerprint;

pub const KEY_PREFIX: &str = "mgf:v2";
/// Number of base64url characters of the SHA-256 digest retained in the key.
const HASH_CHARS: usize = 43;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Prompt,
    Params,
    Upload,
    Assembly,
    Geometry,
    Export,
    Metrics,
    Ai,
    Doc,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Prompt => "prompt",
            Flow::Params => "params",
            Flow::Upload => "upload",
            Flow::Assembly => "assembly",
            Flow::Geometry => "geometry",
            Flow::Export => "export",
            Flow::Metrics => "metrics",
            Flow::Ai => "ai",
            Flow::Doc => "doc",
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sha256_b64url(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Builds the cache key: `"mgf:v2:" <engine_prefix[<=20]> ":f:" <flow> ":a:" <artifact> ":" <hash>`.
pub fn cache_key(fp: &EngineFingerprint, flow: Flow, canonical: &[u8], artifact: &str) -> String {
    let engine_full = fp.to_string_id();
    let mut payload = Vec::with_capacity(engine_full.len() + 1 + canonical.len());
    payload.extend_from_slice(engine_full.as_bytes());
    payload.push(b'|');
    payload.extend_from_slice(canonical);
    let digest = sha256_b64url(&payload);
    let hash_part: String = digest.chars().take(HASH_CHARS).collect();
    format!(
        "{KEY_PREFIX}:{}:f:{}:a:{artifact}:{hash_part}",
        fp.prefix(),
        flow.as_str()
    )
}

/// `"mgf:tag:" <engine_full>`.
pub fn tag_key(fp: &EngineFingerprint) -> String {
    format!("mgf:tag:{}", fp.to_string_id())
}

/// `"mgf:lock:" <cache_key>`.
pub fn lock_key(cache_key: &str) -> String {
    format!("mgf:lock:{cache_key}")
}

/// `<cache_key>:stale`.
pub fn stale_key(cache_key: &str) -> String {
    format!("{cache_key}:stale")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> EngineFingerprint {
        EngineFingerprint::new("1.0", "occt-7.7", "py3.11", "v1", "abcdef1", vec![], vec![])
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = cache_key(&fp(), Flow::Params, b"{\"x\":1}", "data");
        let b = cache_key(&fp(), Flow::Params, b"{\"x\":1}", "data");
        assert_eq!(a, b);
    }

    #[test]
    fn single_field_change_changes_key() {
        let a = cache_key(&fp(), Flow::Params, b"{\"x\":1}", "data");
        let b = cache_key(&fp(), Flow::Params, b"{\"x\":2}", "data");
        assert_ne!(a, b);
        let c = cache_key(&fp(), Flow::Geometry, b"{\"x\":1}", "data");
        assert_ne!(a, c);
    }

    #[test]
    fn engine_change_invalidates() {
        let mut fp2 = fp();
        fp2.kernel_version = "occt-7.8".to_string();
        let a = cache_key(&fp(), Flow::Params, b"{\"x\":1}", "data");
        let b = cache_key(&fp2, Flow::Params, b"{\"x\":1}", "data");
        assert_ne!(a, b);
    }

    #[test]
    fn bounded_length() {
        let key = cache_key(&fp(), Flow::Params, b"{\"x\":1}", "data");
        assert!(key.len() < 200);
    }

    #[test]
    fn lock_and_stale_grammar() {
        let k = "mgf:v2:abc:f:params:a:data:xyz".to_string();
        assert_eq!(lock_key(&k), format!("mgf:lock:{k}"));
        assert_eq!(stale_key(&k), format!("{k}:stale"));
    }
}
