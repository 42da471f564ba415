//! Deterministic Cache Engine — L1 (`l1`), L2 (`l2`), key generation (`key`),
//! compression codec (`codec`), in-flight coalescing (`coalescer`), and the
//! orchestrating `CacheManager` (§4.3–§4.7).

pub mod coalescer;
pub mod codec;
pub mod key;
pub mod l1;
pub mod l2;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng as _;
use serde::Serialize;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::error::ErrorKind;
use crate::fingerprint::EngineFingerprint;

pub use coalescer::Coalescer;
pub use codec::{ContentType, EntryMeta};
pub use key::Flow;
pub use l1::L1Cache;
pub use l2::{L2Backend, LocalBackend, RedisBackend, SharedL2Backend};

#[derive(Debug, Clone, Error, Serialize)]
pub enum CacheError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("compression error")]
    CompressionError,
    #[error("lock timeout acquiring {key}")]
    LockTimeout { key: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Backend(_) => "redis_connection_error",
            CacheError::CompressionError => "compression_error",
            CacheError::LockTimeout { .. } => "lock_timeout",
            CacheError::Serialization(_) => "temporary_failure",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

/// Outcome of a failed `get_or_compute`, distinguishing a cache-layer failure
/// (lock timeout, backend unreachable — the call degrades, it doesn't fail
/// the caller's domain logic) from a `compute_fn` failure (propagated to
/// every coalesced waiter, per §7's propagation policy).
///
/// The in-flight table is keyed by `String` cache keys and shares one
/// broadcast-channel value type across every `get_or_compute` call site, so
/// it cannot carry an arbitrary per-call `E` through unchanged; `compute_fn`'s
/// error is carried by its `Display` rendering rather than its original type.
#[derive(Debug, Clone)]
pub enum ComputeOutcome {
    Cache(CacheError),
    Compute(String),
}

const CACHE_ERR_TAG: &str = "\u{1}cache\u{1}";
const COMPUTE_ERR_TAG: &str = "\u{1}compute\u{1}";

pub struct CacheManagerConfig {
    pub lock_timeout: Duration,
    pub stale_ttl_multiplier: u32,
    /// Whether L2 payloads are candidates for LZ4 compression (§4.5).
    pub compression_enabled: bool,
    /// Minimum payload size, in bytes, before compression is attempted.
    pub compression_threshold_bytes: usize,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            stale_ttl_multiplier: 4,
            compression_enabled: true,
            compression_threshold_bytes: 256,
        }
    }
}

/// Owns the Engine Fingerprint (read from the process-wide singleton), Key
/// Generator, L1, L2, and Coalescer; the central orchestration surface (§4.7).
pub struct CacheManager {
    l1: L1Cache,
    l2: SharedL2Backend,
    coalescer: Coalescer<Vec<u8>, String>,
    config: CacheManagerConfig,
}

impl CacheManager {
    pub fn new(l1_capacity: usize, l1_memory_cap: usize, l2: SharedL2Backend) -> Self {
        Self::with_config(l1_capacity, l1_memory_cap, l2, CacheManagerConfig::default())
    }

    pub fn with_config(l1_capacity: usize, l1_memory_cap: usize, l2: SharedL2Backend, config: CacheManagerConfig) -> Self {
        Self {
            l1: L1Cache::new(l1_capacity, l1_memory_cap),
            l2,
            coalescer: Coalescer::new(),
            config,
        }
    }

    fn fp(&self) -> &'static EngineFingerprint {
        crate::fingerprint::get()
    }

    fn build_key(&self, flow: Flow, canonical: &[u8], artifact: &str) -> String {
        key::cache_key(self.fp(), flow, canonical, artifact)
    }

    fn sniff_content_type(value: &[u8]) -> ContentType {
        if serde_json::from_slice::<serde_json::Value>(value).is_ok() {
            ContentType::Json
        } else if std::str::from_utf8(value).is_ok() {
            ContentType::Text
        } else {
            ContentType::Bytes
        }
    }

    /// Runs the L2 compression policy (§4.5) and wraps the result with its
    /// `EntryMeta` sidecar so a later `unframe` can tell whether the stored
    /// bytes are compressed without guessing.
    fn frame(&self, value: &[u8]) -> Result<Vec<u8>, CacheError> {
        let (stored, compressed) = codec::encode(value, self.config.compression_threshold_bytes, self.config.compression_enabled);
        let meta = EntryMeta {
            compressed,
            content_type: Self::sniff_content_type(value),
            original_size: value.len(),
            compressed_size: stored.len(),
            timestamp: Utc::now().timestamp(),
        };
        bincode::serialize(&(meta, stored)).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn unframe(&self, framed: &[u8]) -> Result<Vec<u8>, CacheError> {
        let (meta, stored): (EntryMeta, Vec<u8>) =
            bincode::deserialize(framed).map_err(|e| CacheError::Serialization(e.to_string()))?;
        codec::decode(&stored, meta.compressed)
    }

    /// L1 then L2; an L2 hit populates L1.
    #[instrument(skip(self, canonical), fields(cache_key))]
    pub async fn get(
        &self,
        flow: Flow,
        canonical: &[u8],
        artifact: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        let cache_key = self.build_key(flow, canonical, artifact);
        tracing::Span::current().record("cache_key", &cache_key.as_str());

        if let Some(v) = self.l1.get(&cache_key) {
            return Ok(Some(v));
        }
        match self.l2.get(&cache_key).await {
            Ok(Some(framed)) => match self.unframe(&framed) {
                Ok(v) => {
                    self.l1.set(&cache_key, v.clone(), None);
                    Ok(Some(v))
                }
                Err(e) => {
                    warn!(error = %e, "L2 payload malformed, treating as miss");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "L2 read failed, treating as miss");
                Ok(None)
            }
        }
    }

    /// Stores in L1 and L2, and records tag-set membership in L2. The L2
    /// write goes through the compression codec (§4.5); L1 always keeps the
    /// raw, uncompressed bytes for zero-overhead reads.
    pub async fn set(
        &self,
        flow: Flow,
        canonical: &[u8],
        value: Vec<u8>,
        artifact: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let cache_key = self.build_key(flow, canonical, artifact);
        self.l1.set(&cache_key, value.clone(), None);
        let framed = self.frame(&value)?;
        self.l2.set(&cache_key, framed, ttl).await?;
        let tag = key::tag_key(self.fp());
        self.l2.add_to_set(&tag, &cache_key).await?;
        Ok(())
    }

    async fn poll_for_primary(&self, cache_key: &str, deadline: std::time::Instant) -> Option<Vec<u8>> {
        let mut backoff = Duration::from_millis(20);
        loop {
            if let Ok(Some(framed)) = self.l2.get(cache_key).await {
                if let Ok(v) = self.unframe(&framed) {
                    return Some(v);
                }
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            let jitter = rand::thread_rng().gen_range(0..20);
            tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
            backoff = (backoff * 2).min(Duration::from_millis(500));
        }
    }

    /// The central single-flight path (§4.7 step list).
    #[instrument(skip(self, canonical, compute_fn), fields(cache_key))]
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        flow: Flow,
        canonical: &[u8],
        artifact: &str,
        ttl: Duration,
        compute_fn: F,
    ) -> Result<Vec<u8>, ComputeOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, E>>,
        E: std::fmt::Display + Send + 'static,
    {
        let cache_key = self.build_key(flow, canonical, artifact);
        tracing::Span::current().record("cache_key", &cache_key.as_str());
        let stale_key = key::stale_key(&cache_key);
        let lock_key = key::lock_key(&cache_key);

        let outcome = self
            .coalescer
            .coalesce(&cache_key, || async {
                if let Some(v) = self.l1.get(&cache_key) {
                    return Ok(v);
                }
                if let Ok(Some(framed)) = self.l2.get(&cache_key).await {
                    if let Ok(v) = self.unframe(&framed) {
                        self.l1.set(&cache_key, v.clone(), None);
                        return Ok(v);
                    }
                }

                let acquired = self
                    .l2
                    .set_if_absent(&lock_key, self.config.lock_timeout)
                    .await
                    .map_err(|e| format!("{CACHE_ERR_TAG}{e}"))?;

                if !acquired {
                    if let Ok(Some(stale)) = self.l2.get(&stale_key).await {
                        if let Ok(v) = self.unframe(&stale) {
                            return Ok(v);
                        }
                    }
                    let deadline = std::time::Instant::now() + self.config.lock_timeout;
                    if let Some(v) = self.poll_for_primary(&cache_key, deadline).await {
                        return Ok(v);
                    }
                    return Err(format!(
                        "{CACHE_ERR_TAG}{}",
                        CacheError::LockTimeout { key: cache_key.clone() }
                    ));
                }

                if let Ok(Some(framed)) = self.l2.get(&cache_key).await {
                    if let Ok(v) = self.unframe(&framed) {
                        let _ = self.l2.delete(&lock_key).await;
                        return Ok(v);
                    }
                }

                let computed = compute_fn().await;
                let result = match computed {
                    Ok(value) => {
                        self.l1.set(&cache_key, value.clone(), None);
                        match self.frame(&value) {
                            Ok(framed) => {
                                let _ = self.l2.set(&cache_key, framed.clone(), ttl).await;
                                let _ = self
                                    .l2
                                    .set(&stale_key, framed, ttl * self.config.stale_ttl_multiplier)
                                    .await;
                                let tag = key::tag_key(self.fp());
                                let _ = self.l2.add_to_set(&tag, &cache_key).await;
                            }
                            Err(e) => warn!(error = %e, "failed to frame value for L2, serving from L1 only"),
                        }
                        Ok(value)
                    }
                    // compute_fn errors never reach the cache: no write occurs here (§7).
                    Err(e) => Err(format!("{COMPUTE_ERR_TAG}{e}")),
                };
                let _ = self.l2.delete(&lock_key).await;
                result
            })
            .await;

        outcome.map_err(|s| {
            if let Some(msg) = s.strip_prefix(COMPUTE_ERR_TAG) {
                ComputeOutcome::Compute(msg.to_string())
            } else if let Some(msg) = s.strip_prefix(CACHE_ERR_TAG) {
                ComputeOutcome::Cache(CacheError::Backend(msg.to_string()))
            } else {
                ComputeOutcome::Cache(CacheError::LockTimeout { key: cache_key })
            }
        })
    }

    /// Invalidates the named (or current) engine tag set in L2 and clears L1.
    pub async fn invalidate_engine(&self, fp: Option<&EngineFingerprint>) -> Result<usize, CacheError> {
        let fp = fp.unwrap_or_else(|| self.fp());
        let tag = key::tag_key(fp);
        let members = self.l2.set_members(&tag).await?;
        let deleted = self.l2.delete_many(&members).await?;
        self.l2.delete(&tag).await?;
        self.l1.clear();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() {
        let _ = crate::fingerprint::init(EngineFingerprint::new(
            "1.0", "occt", "py3.11", "v1", "abc1234", vec![], vec![],
        ));
    }

    fn manager() -> CacheManager {
        setup();
        CacheManager::new(100, 10_000_000, Arc::new(LocalBackend::new()))
    }

    #[tokio::test]
    async fn scenario_coalesce_identical_requests() {
        let mgr = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let counter = counter.clone();
            let mgr = &mgr;
            handles.push(async {
                mgr.get_or_compute(Flow::Params, b"{\"x\":1}", "data", Duration::from_secs(60), || async {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<Vec<u8>, String>(b"42".to_vec())
                })
                .await
            });
        }
        let results = futures::future::join_all(handles).await;
        for r in results {
            assert_eq!(r.unwrap(), b"42".to_vec());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scenario_two_tier_promotion() {
        let mgr = manager();
        mgr.set(Flow::Geometry, b"{\"r\":10}", b"brep-bytes".to_vec(), "data", Duration::from_secs(60))
            .await
            .unwrap();
        mgr.l1.clear();
        let got = mgr.get(Flow::Geometry, b"{\"r\":10}", "data").await.unwrap();
        assert_eq!(got, Some(b"brep-bytes".to_vec()));
        assert!(mgr.l1.get(&mgr.build_key(Flow::Geometry, b"{\"r\":10}", "data")).is_some());
    }

    #[tokio::test]
    async fn compute_error_propagates_as_compute_variant() {
        let mgr = manager();
        let err = mgr
            .get_or_compute(Flow::Params, b"{\"y\":1}", "data", Duration::from_secs(60), || async {
                Err::<Vec<u8>, _>("boom")
            })
            .await
            .unwrap_err();
        match err {
            ComputeOutcome::Compute(msg) => assert_eq!(msg, "boom"),
            ComputeOutcome::Cache(_) => panic!("expected a compute error, not a cache-layer error"),
        }
        assert_eq!(mgr.get(Flow::Params, b"{\"y\":1}", "data").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_engine_clears_all_tagged_keys() {
        let mgr = manager();
        mgr.set(Flow::Params, b"{\"a\":1}", b"v1".to_vec(), "data", Duration::from_secs(60)).await.unwrap();
        mgr.set(Flow::Params, b"{\"a\":2}", b"v2".to_vec(), "data", Duration::from_secs(60)).await.unwrap();
        let deleted = mgr.invalidate_engine(None).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(mgr.get(Flow::Params, b"{\"a\":1}", "data").await.unwrap(), None);
        assert_eq!(mgr.get(Flow::Params, b"{\"a\":2}", "data").await.unwrap(), None);
    }
}
