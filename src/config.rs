//! Process configuration, loaded from `MGF_`-prefixed environment variables.
//!
//! Mirrors the "Environment variables honored" list in §6: loading never
//! panics — unset optional values fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| humantime::parse_duration(&v).ok())
        .unwrap_or(default)
}

/// TTL defaults by cache flow, per §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTtls {
    #[serde(with = "humantime_serde")]
    pub geometry: Duration,
    #[serde(with = "humantime_serde")]
    pub export: Duration,
    #[serde(with = "humantime_serde")]
    pub ai: Duration,
    #[serde(with = "humantime_serde")]
    pub metrics: Duration,
    #[serde(with = "humantime_serde")]
    pub doc_template: Duration,
    #[serde(with = "humantime_serde")]
    pub default: Duration,
}

impl Default for FlowTtls {
    fn default() -> Self {
        Self {
            geometry: Duration::from_secs(24 * 3600),
            export: Duration::from_secs(7 * 24 * 3600),
            ai: Duration::from_secs(6 * 3600),
            metrics: Duration::from_secs(30 * 24 * 3600),
            doc_template: Duration::from_secs(7 * 24 * 3600),
            default: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Thread cap applied to numeric libraries inside the worker subprocess environment.
    pub numeric_lib_threads: usize,
    /// Deterministic hash seed exported to worker subprocesses.
    pub hash_seed: u64,
    /// Locale forced on worker subprocesses (always `C` per §4.11).
    pub locale: String,
    /// Scoped home directory for the engine process.
    pub engine_home: String,
    /// Whether the engine runs headless/offscreen.
    pub engine_headless: bool,
    /// Cache backend connection string (e.g. `redis://host:port`).
    pub cache_url: String,
    /// Connection pool size for the L2 backend.
    pub cache_pool_size: u32,
    /// Whether L2 payload compression is enabled.
    pub compression_enabled: bool,
    /// Minimum payload size, in bytes, before compression is attempted.
    pub compression_threshold_bytes: usize,
    /// L1 capacity, in number of entries.
    pub l1_capacity: usize,
    /// L1 aggregate memory cap, in bytes.
    pub l1_memory_cap_bytes: usize,
    /// Consecutive failures before the circuit breaker opens.
    pub circuit_breaker_threshold: u32,
    /// Cooldown before an open circuit breaker tries a half-open trial.
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_cooldown: Duration,
    /// Default TTLs by cache flow.
    pub flow_ttls: FlowTtls,
    /// Object storage endpoint (opaque to this crate; consumed as an interface only).
    pub storage_endpoint: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            numeric_lib_threads: 1,
            hash_seed: 0,
            locale: "C".to_string(),
            engine_home: "/tmp/mgf-engine-home".to_string(),
            engine_headless: true,
            cache_url: "redis://127.0.0.1:6379".to_string(),
            cache_pool_size: 8,
            compression_enabled: true,
            compression_threshold_bytes: 256,
            l1_capacity: 10_000,
            l1_memory_cap_bytes: 256 * 1024 * 1024,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
            flow_ttls: FlowTtls::default(),
            storage_endpoint: "http://127.0.0.1:9000".to_string(),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from `MGF_`-prefixed environment variables,
    /// falling back to documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            numeric_lib_threads: env_or("MGF_NUMERIC_LIB_THREADS", defaults.numeric_lib_threads),
            hash_seed: env_or("MGF_HASH_SEED", defaults.hash_seed),
            locale: std::env::var("MGF_LOCALE").unwrap_or(defaults.locale),
            engine_home: std::env::var("MGF_ENGINE_HOME").unwrap_or(defaults.engine_home),
            engine_headless: env_or("MGF_ENGINE_HEADLESS", defaults.engine_headless),
            cache_url: std::env::var("MGF_CACHE_URL").unwrap_or(defaults.cache_url),
            cache_pool_size: env_or("MGF_CACHE_POOL_SIZE", defaults.cache_pool_size),
            compression_enabled: env_or("MGF_COMPRESSION_ENABLED", defaults.compression_enabled),
            compression_threshold_bytes: env_or(
                "MGF_COMPRESSION_THRESHOLD_BYTES",
                defaults.compression_threshold_bytes,
            ),
            l1_capacity: env_or("MGF_L1_CAPACITY", defaults.l1_capacity),
            l1_memory_cap_bytes: env_or("MGF_L1_MEMORY_CAP_BYTES", defaults.l1_memory_cap_bytes),
            circuit_breaker_threshold: env_or(
                "MGF_CIRCUIT_BREAKER_THRESHOLD",
                defaults.circuit_breaker_threshold,
            ),
            circuit_breaker_cooldown: env_duration(
                "MGF_CIRCUIT_BREAKER_COOLDOWN",
                defaults.circuit_breaker_cooldown,
            ),
            flow_ttls: defaults.flow_ttls,
            storage_endpoint: std::env::var("MGF_STORAGE_ENDPOINT")
                .unwrap_or(defaults.storage_endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.locale, "C");
        assert!(cfg.l1_capacity > 0);
    }

    #[test]
    fn from_env_falls_back_without_panicking() {
        std::env::remove_var("MGF_L1_CAPACITY");
        let cfg = CoreConfig::from_env();
        assert_eq!(cfg.l1_capacity, CoreConfig::default().l1_capacity);
    }
}
