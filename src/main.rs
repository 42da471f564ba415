//! mgf-core supervisor binary.
//!
//! Wires the cache, document, worker, and scheduler subsystems into a single
//! process, seeds the built-in recurring jobs, and runs the scheduler's
//! dispatch loop until interrupted. Library consumers embedding this crate
//! in a larger service are expected to construct these subsystems themselves
//! instead of running this binary.

use std::sync::Arc;

use mgf_core::cache::l2::{LocalBackend, RedisBackend};
use mgf_core::cache::{CacheManager, CacheManagerConfig};
use mgf_core::config::CoreConfig;
use mgf_core::document::adapter::{MockAdapter, RealFreecadAdapter};
use mgf_core::document::{DocumentManager, DocumentManagerConfig};
use mgf_core::scheduler::{register_builtin_jobs, MemoryJobStore, Scheduler};
use mgf_core::worker::{JobExecutor, StaticTierResolver};
use mgf_core::{CoreError, EngineFingerprint};

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run().await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!(code = err.code(), "fatal error during startup: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run() -> Result<(), CoreError> {
    let config = CoreConfig::from_env();

    mgf_core::fingerprint::init(EngineFingerprint::from_env("occt-unknown", "py3-unknown"));
    tracing::info!(
        fingerprint = %mgf_core::fingerprint::get(),
        version = mgf_core::VERSION,
        "starting mgf-core"
    );

    let l2: mgf_core::cache::SharedL2Backend = match RedisBackend::connect(&config.cache_url).await {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            tracing::warn!(%err, "redis L2 backend unavailable, falling back to in-process backend");
            Arc::new(LocalBackend::new())
        }
    };
    let cache_config = CacheManagerConfig {
        compression_enabled: config.compression_enabled,
        compression_threshold_bytes: config.compression_threshold_bytes,
        ..CacheManagerConfig::default()
    };
    let _cache = CacheManager::with_config(config.l1_capacity, config.l1_memory_cap_bytes, l2, cache_config);

    let adapter: mgf_core::document::adapter::SharedAdapter =
        match RealFreecadAdapter::locate(None, "freecadcmd") {
            Ok(real) => Arc::new(real),
            Err(err) => {
                tracing::warn!(%err, "FreeCAD engine binary not found, using mock adapter");
                Arc::new(MockAdapter::new())
            }
        };
    let documents = Arc::new(DocumentManager::new(adapter, DocumentManagerConfig::default()));

    let tier_resolver = Arc::new(StaticTierResolver(std::collections::HashMap::new()));
    let _executor = JobExecutor::new(config.clone(), tier_resolver, documents.clone(), true);

    let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
    register_builtin_jobs(&scheduler)?;

    tracing::info!("scheduler initialized, entering dispatch loop");
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let due = scheduler.due_jobs(chrono::Utc::now());
                for job in due {
                    tracing::debug!(job_id = %job.id, "job due");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
